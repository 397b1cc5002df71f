//! User-profile pipeline: a labeled two-column table routed by label cell.
//!
//! Unlike listings, a profile page holds exactly one record, so nothing is
//! emitted until the pass completes. Cell routing alternates between a label
//! cell ("user:", "karma:", ...) and the value cell that follows it; labels
//! that match nothing reset the route so unrelated table cells pass through.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::LazyLock;

use chrono::NaiveDate;
use lol_html::{element, text, HtmlRewriter, Settings};
use regex::Regex;
use tokio::sync::mpsc;

use super::{pump, spawn_pass, PumpEnd};
use crate::assemble::{is_void_tag, leading_int, FieldAccumulator};
use crate::bridge::{ContinuationCell, Handoff};
use crate::client::{ByteChunk, ByteSource};
use crate::error::ExtractError;
use crate::models::Profile;
use crate::normalize::normalize_body;

static BIRTH_DAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"day=(\d{4}-\d{2}-\d{2})").unwrap());

pub(crate) async fn fetch(source: ByteSource) -> Result<Profile, ExtractError> {
    let mut stream = spawn_pass(source, drive);
    let first = stream.recv().await;
    stream.cancel().await;
    match first {
        Some(result) => result,
        None => Err(ExtractError::MalformedRecord(
            "page contained no profile table".into(),
        )),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Route {
    User,
    Created,
    Karma,
    About,
}

impl Route {
    fn from_label(label: &str) -> Option<Route> {
        match label {
            "user:" => Some(Route::User),
            "created:" => Some(Route::Created),
            "karma:" => Some(Route::Karma),
            "about:" => Some(Route::About),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Cell {
    Idle,
    Label,
    Value(Route),
}

struct State {
    cell: Cell,
    pending_route: Option<Route>,
    label: FieldAccumulator,
    value: FieldAccumulator,
    id: Option<String>,
    created_at: Option<i64>,
    karma: Option<i64>,
    about: Option<String>,
}

impl State {
    fn open_cell(&mut self) {
        match self.pending_route.take() {
            Some(route) => {
                self.cell = Cell::Value(route);
                self.value.reset();
            }
            None => {
                self.cell = Cell::Label;
                self.label.reset();
            }
        }
    }

    fn close_cell(&mut self) {
        match self.cell {
            Cell::Label => {
                self.pending_route = Route::from_label(&self.label.take_text());
            }
            Cell::Value(route) => self.commit(route),
            Cell::Idle => {}
        }
        self.cell = Cell::Idle;
    }

    fn commit(&mut self, route: Route) {
        match route {
            Route::User => self.id = Some(self.value.take_text()),
            // The creation date comes from the anchor href, not the label.
            Route::Created => {
                self.value.reset();
            }
            Route::Karma => self.karma = leading_int(&self.value.take_text()),
            Route::About => {
                let raw = self.value.take();
                if !raw.trim().is_empty() {
                    self.about = Some(normalize_body(&raw));
                }
            }
        }
    }

    fn finish(&mut self) -> Result<Profile, ExtractError> {
        let id = self
            .id
            .take()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ExtractError::MalformedRecord("profile record missing user id".into()))?;
        Ok(Profile {
            id,
            created_at: self.created_at.unwrap_or(0),
            karma: self.karma.unwrap_or(0),
            about: self.about.take(),
        })
    }
}

fn drive(mut bytes: mpsc::Receiver<ByteChunk>, out: Handoff<Profile>, mut cell: ContinuationCell) {
    let state = Rc::new(RefCell::new(State {
        cell: Cell::Idle,
        pending_route: None,
        label: FieldAccumulator::default(),
        value: FieldAccumulator::default(),
        id: None,
        created_at: None,
        karma: None,
        about: None,
    }));

    let rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("tr > td", {
                    let st = Rc::clone(&state);
                    move |el| {
                        st.borrow_mut().open_cell();
                        if let Some(handlers) = el.end_tag_handlers() {
                            let st = Rc::clone(&st);
                            let handler: lol_html::EndTagHandler<'static> =
                                Box::new(move |_end| {
                                    st.borrow_mut().close_cell();
                                    Ok(())
                                });
                            handlers.push(handler);
                        }
                        Ok(())
                    }
                }),
                text!("tr > td", {
                    let st = Rc::clone(&state);
                    move |t| {
                        let mut st = st.borrow_mut();
                        match st.cell {
                            Cell::Label => st.label.push_text(t.as_str()),
                            Cell::Value(_) => st.value.push_text(t.as_str()),
                            Cell::Idle => {}
                        }
                        Ok(())
                    }
                }),
                // Inline markup survives only in the about field.
                element!("tr > td *", {
                    let st = Rc::clone(&state);
                    move |el| {
                        if st.borrow().cell != Cell::Value(Route::About) {
                            return Ok(());
                        }
                        let name = el.tag_name();
                        let attrs: Vec<(String, String)> = el
                            .attributes()
                            .iter()
                            .map(|a| (a.name(), a.value()))
                            .collect();
                        st.borrow_mut().value.open_tag(&name, attrs.into_iter());
                        if !is_void_tag(&name) {
                            if let Some(handlers) = el.end_tag_handlers() {
                                let st = Rc::clone(&st);
                                // Close with the element's own name: an
                                // unclosed tag in the about cell is ended by
                                // the cell's `</td>`.
                                let handler: lol_html::EndTagHandler<'static> =
                                    Box::new(move |_end| {
                                        let mut st = st.borrow_mut();
                                        if st.cell == Cell::Value(Route::About) {
                                            st.value.close_tag(&name);
                                        }
                                        Ok(())
                                    });
                                handlers.push(handler);
                            }
                        }
                        Ok(())
                    }
                }),
                element!(r#"a[href*="birth="]"#, {
                    let st = Rc::clone(&state);
                    move |el| {
                        if let Some(href) = el.get_attribute("href") {
                            let created = BIRTH_DAY_RE
                                .captures(&href)
                                .and_then(|c| NaiveDate::parse_from_str(&c[1], "%Y-%m-%d").ok())
                                .and_then(|d| d.and_hms_opt(0, 0, 0))
                                .map(|dt| dt.and_utc().timestamp());
                            st.borrow_mut().created_at = created;
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
            match state.borrow_mut().finish() {
                Ok(profile) => {
                    let _ = out.emit(profile);
                }
                Err(e) => out.fail(e),
            }
            cell.resolve();
        }
        PumpEnd::Cancelled => cell.resolve(),
        PumpEnd::Failed(e) => {
            out.fail(e);
            cell.resolve();
        }
    }
}

// ── Tests ──
