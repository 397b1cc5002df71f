//! Flat listing pipeline for front-style pages.
//!
//! Boundary policy: a `tr.athing` row starts a record and seals the previous
//! one; the `a.morelink` terminal marker seals the last pending record and
//! carries the continuation reference; a truncated page seals on stream
//! completion instead.

use std::cell::RefCell;
use std::rc::Rc;

use lol_html::{element, text, HtmlRewriter, Settings};
use tokio::sync::mpsc;
use tracing::warn;

use super::{pump, spawn_pass, PumpEnd};
use crate::assemble::{leading_count, FieldAccumulator};
use crate::bridge::{Cancelled, ContinuationCell, Handoff, RecordStream};
use crate::client::{ByteChunk, ByteSource};
use crate::models::{Listing, ListingKind};
use crate::normalize::classify_listing;

pub(crate) fn spawn(source: ByteSource) -> RecordStream<Listing> {
    spawn_pass(source, drive)
}

#[derive(Default)]
struct Builder {
    id: u64,
    title: FieldAccumulator,
    url: Option<String>,
    score: FieldAccumulator,
    author: FieldAccumulator,
    age: FieldAccumulator,
    // Overwritten per matching anchor; the comments link is the last one in
    // the subtext row.
    comments: FieldAccumulator,
}

impl Builder {
    fn new(id: u64) -> Self {
        Builder {
            id,
            ..Default::default()
        }
    }

    fn finish(mut self) -> Listing {
        let comment_region = self.comments.take_text();
        classify_listing(Listing {
            id: self.id,
            title: self.title.take_text(),
            url: self.url.take(),
            score: leading_count(&self.score.take_text()),
            author: self.author.take_text(),
            age_label: self.age.take_text(),
            comment_count: Some(leading_count(&comment_region).unwrap_or(0)),
            kind: ListingKind::Story,
        })
    }
}

struct State {
    current: Option<Builder>,
    cell: ContinuationCell,
}

impl State {
    fn start(&mut self, id_attr: Option<String>) {
        self.current = match id_attr.as_deref().and_then(|s| s.parse().ok()) {
            Some(id) => Some(Builder::new(id)),
            None => {
                warn!(
                    id = id_attr.as_deref().unwrap_or(""),
                    "listing row without a numeric id, skipped"
                );
                None
            }
        };
    }

    fn seal(&mut self, out: &Handoff<Listing>) -> Result<(), Cancelled> {
        if let Some(builder) = self.current.take() {
            out.emit(builder.finish())?;
        }
        Ok(())
    }

    fn with(&mut self, f: impl FnOnce(&mut Builder)) {
        if let Some(builder) = self.current.as_mut() {
            f(builder);
        }
    }
}

fn drive(mut bytes: mpsc::Receiver<ByteChunk>, out: Handoff<Listing>, cell: ContinuationCell) {
    let state = Rc::new(RefCell::new(State {
        current: None,
        cell,
    }));

    let rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                // Start-of-record marker.
                element!("tr.athing", {
                    let st = Rc::clone(&state);
                    let out = out.clone();
                    move |el| {
                        let mut st = st.borrow_mut();
                        st.seal(&out)?;
                        st.start(el.get_attribute("id"));
                        Ok(())
                    }
                }),
                element!("span.titleline > a", {
                    let st = Rc::clone(&state);
                    move |el| {
                        let href = el.get_attribute("href");
                        st.borrow_mut().with(|b| {
                            b.url = href.clone();
                            b.title.reset();
                        });
                        Ok(())
                    }
                }),
                text!("span.titleline > a", {
                    let st = Rc::clone(&state);
                    move |t| {
                        st.borrow_mut().with(|b| b.title.push_text(t.as_str()));
                        Ok(())
                    }
                }),
                text!("td.subtext span.score", {
                    let st = Rc::clone(&state);
                    move |t| {
                        st.borrow_mut().with(|b| b.score.push_text(t.as_str()));
                        Ok(())
                    }
                }),
                text!("td.subtext a.hnuser", {
                    let st = Rc::clone(&state);
                    move |t| {
                        st.borrow_mut().with(|b| b.author.push_text(t.as_str()));
                        Ok(())
                    }
                }),
                text!("td.subtext span.age", {
                    let st = Rc::clone(&state);
                    move |t| {
                        st.borrow_mut().with(|b| b.age.push_text(t.as_str()));
                        Ok(())
                    }
                }),
                element!(r#"td.subtext a[href^="item?"]"#, {
                    let st = Rc::clone(&state);
                    move |_el| {
                        st.borrow_mut().with(|b| b.comments.reset());
                        Ok(())
                    }
                }),
                text!(r#"td.subtext a[href^="item?"]"#, {
                    let st = Rc::clone(&state);
                    move |t| {
                        st.borrow_mut().with(|b| b.comments.push_text(t.as_str()));
                        Ok(())
                    }
                }),
                // Terminal marker doubles as the continuation anchor.
                element!("a.morelink", {
                    let st = Rc::clone(&state);
                    let out = out.clone();
                    move |el| {
                        let mut st = st.borrow_mut();
                        st.seal(&out)?;
                        if let Some(href) = el.get_attribute("href") {
                            st.cell.capture(href);
                        }
                        Ok(())
                    }
                }),
            ],
            ..Settings::new()
        },
        |_: &[u8]| {},
    );

    match pump(&mut bytes, rewriter) {
        PumpEnd::Completed => {
            let mut st = state.borrow_mut();
            // Truncated page: the last record seals on stream completion.
            let _ = st.seal(&out);
            st.cell.resolve();
        }
        PumpEnd::Cancelled => state.borrow_mut().cell.resolve(),
        PumpEnd::Failed(e) => {
            out.fail(e);
            state.borrow_mut().cell.resolve();
        }
    }
}

// ── Tests ──
