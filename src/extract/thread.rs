//! Thread pipeline: one pass, one channel, header first.
//!
//! Header and comment extraction are a single pipeline over the same markup
//! stream. Header selectors are scoped under `table.fatitem`, comment
//! selectors under `table.comment-tree`, so the two regions never cross-write
//! even though they share one boundary state and one bridge. The channel
//! carries a tagged union internally; callers see a `(header, comments)`
//! pair where pulling comments is a continuation of the same pass.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::LazyLock;

use lol_html::html_content::{Element, EndTag};
use lol_html::{element, text, HtmlRewriter, Settings};
use regex::Regex;
use tokio::sync::mpsc;
use tracing::warn;

use super::{pump, spawn_pass, PumpEnd};
use crate::assemble::{is_void_tag, leading_count, FieldAccumulator};
use crate::bridge::{Cancelled, ContinuationCell, Handoff, RecordStream};
use crate::client::{ByteChunk, ByteSource};
use crate::error::ExtractError;
use crate::models::{Comment, ListingKind, Quality, ThreadHeader};
use crate::normalize::{depth_from_width, repair_body};

static ITEM_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"id=(\d+)").unwrap());

/// A focused post plus its lazily-pulled comments. Dropping or cancelling
/// `comments` abandons the rest of the pass.
#[derive(Debug)]
pub struct Thread {
    pub header: ThreadHeader,
    pub comments: CommentStream,
}

/// The comment side of a thread pass: same producer, same ordered channel the
/// header came from.
#[derive(Debug)]
pub struct CommentStream {
    inner: RecordStream<ThreadRecord>,
}

impl CommentStream {
    pub async fn recv(&mut self) -> Option<Result<Comment, ExtractError>> {
        loop {
            match self.inner.recv().await {
                Some(Ok(ThreadRecord::Comment(c))) => return Some(Ok(c)),
                Some(Ok(ThreadRecord::Header(_))) => {
                    warn!("duplicate thread header ignored");
                }
                Some(Err(e)) => return Some(Err(e)),
                None => return None,
            }
        }
    }

    pub async fn continuation(self) -> String {
        self.inner.continuation().await
    }

    pub async fn cancel(self) {
        self.inner.cancel().await
    }
}

#[derive(Debug)]
pub(crate) enum ThreadRecord {
    Header(ThreadHeader),
    Comment(Comment),
}

/// Pull the header off a fresh pass, then hand the rest of the stream to the
/// caller as the comment sequence.
pub(crate) async fn open(source: ByteSource) -> Result<Thread, ExtractError> {
    let mut stream = spawn(source);
    match stream.recv().await {
        Some(Ok(ThreadRecord::Header(header))) => Ok(Thread {
            header,
            comments: CommentStream { inner: stream },
        }),
        Some(Ok(ThreadRecord::Comment(_))) => {
            stream.cancel().await;
            Err(ExtractError::MalformedRecord(
                "comment arrived before the thread header".into(),
            ))
        }
        Some(Err(e)) => {
            stream.cancel().await;
            Err(e)
        }
        None => {
            stream.cancel().await;
            Err(ExtractError::MalformedRecord(
                "page contained no thread header".into(),
            ))
        }
    }
}

pub(crate) fn spawn(source: ByteSource) -> RecordStream<ThreadRecord> {
    spawn_pass(source, drive)
}

fn item_id(href: &str) -> Option<u64> {
    ITEM_ID_RE
        .captures(href)
        .and_then(|c| c[1].parse().ok())
}

#[derive(Default)]
struct HeaderBuilder {
    id: u64,
    title: FieldAccumulator,
    url: Option<String>,
    score: FieldAccumulator,
    author: FieldAccumulator,
    age: FieldAccumulator,
    comments: FieldAccumulator,
    body: FieldAccumulator,
    has_body: bool,
    quality: Option<Quality>,
    root_story_id: Option<u64>,
    parent_id: Option<u64>,
    /// Item link currently being labeled: `(target id, label text)`.
    pending_nav: Option<(Option<u64>, FieldAccumulator)>,
}

impl HeaderBuilder {
    fn new(id: u64) -> Self {
        HeaderBuilder {
            id,
            ..Default::default()
        }
    }

    fn open_nav(&mut self, href: &str) {
        self.close_nav();
        self.pending_nav = Some((item_id(href), FieldAccumulator::default()));
    }

    fn close_nav(&mut self) {
        if let Some((target, mut label)) = self.pending_nav.take() {
            if label.take_text() == "parent" {
                self.parent_id = target;
            }
        }
    }

    fn finish(mut self) -> ThreadHeader {
        self.close_nav();
        let author = self.author.take_text();
        let (body, body_quality) = if self.has_body {
            let raw = self.body.take();
            let (normalized, deleted) = repair_body(&raw);
            if deleted {
                (None, None)
            } else {
                (Some(normalized), self.quality)
            }
        } else {
            (None, None)
        };
        let mut header = ThreadHeader {
            id: self.id,
            title: self.title.take_text(),
            url: self.url.take(),
            score: leading_count(&self.score.take_text()),
            author,
            age_label: self.age.take_text(),
            comment_count: Some(leading_count(&self.comments.take_text()).unwrap_or(0)),
            kind: ListingKind::Story,
            parent_id: self.parent_id,
            root_story_id: self.root_story_id,
            body,
            body_quality,
        };
        if header.author.is_empty() && header.body.is_none() {
            header.kind = ListingKind::Job;
            header.score = None;
            header.comment_count = None;
        }
        header
    }
}

#[derive(Default)]
struct CommentBuilder {
    id: u64,
    author: FieldAccumulator,
    age: FieldAccumulator,
    body: FieldAccumulator,
    quality: Option<Quality>,
    indent_width: Option<u32>,
}

impl CommentBuilder {
    fn new(id: u64) -> Self {
        CommentBuilder {
            id,
            ..Default::default()
        }
    }
}

struct State {
    header: Option<HeaderBuilder>,
    header_emitted: bool,
    current: Option<CommentBuilder>,
    /// `(depth, id)` of ancestors of the comment under construction.
    ancestors: Vec<(u32, u64)>,
    header_id: Option<u64>,
    root_id: Option<u64>,
    cell: ContinuationCell,
}

impl State {
    fn start_header(&mut self, id_attr: Option<String>) {
        self.header = match id_attr.as_deref().and_then(|s| s.parse().ok()) {
            Some(id) => Some(HeaderBuilder::new(id)),
            None => {
                warn!("thread header row without a numeric id");
                None
            }
        };
    }

    fn seal_header(&mut self, out: &Handoff<ThreadRecord>) -> Result<(), Cancelled> {
        if self.header_emitted {
            return Ok(());
        }
        if let Some(builder) = self.header.take() {
            let header = builder.finish();
            self.header_id = Some(header.id);
            self.root_id = header.root_story_id.or(Some(header.id));
            self.header_emitted = true;
            out.emit(ThreadRecord::Header(header))?;
        }
        Ok(())
    }

    fn start_comment(&mut self, id_attr: Option<String>) {
        self.current = match id_attr.as_deref().and_then(|s| s.parse().ok()) {
            Some(id) => Some(CommentBuilder::new(id)),
            None => {
                warn!(
                    id = id_attr.as_deref().unwrap_or(""),
                    "comment row without a numeric id, skipped"
                );
                None
            }
        };
    }

    fn seal_comment(&mut self, out: &Handoff<ThreadRecord>) -> Result<(), Cancelled> {
        if let Some(mut builder) = self.current.take() {
            let depth = depth_from_width(builder.indent_width.unwrap_or(0));
            while matches!(self.ancestors.last(), Some((d, _)) if *d >= depth) {
                self.ancestors.pop();
            }
            let parent_id = self.ancestors.last().map(|&(_, id)| id).or(self.header_id);
            let raw = builder.body.take();
            let (body, deleted) = repair_body(&raw);
            let comment = Comment {
                id: builder.id,
                author: builder.author.take_text(),
                age_label: builder.age.take_text(),
                body,
                depth,
                parent_id,
                root_story_id: self.root_id,
                quality: builder.quality,
                deleted,
            };
            self.ancestors.push((depth, comment.id));
            out.emit(ThreadRecord::Comment(comment))?;
        }
        Ok(())
    }

    fn with_header(&mut self, f: impl FnOnce(&mut HeaderBuilder)) {
        if let Some(builder) = self.header.as_mut() {
            f(builder);
        }
    }

    fn with_comment(&mut self, f: impl FnOnce(&mut CommentBuilder)) {
        if let Some(builder) = self.current.as_mut() {
            f(builder);
        }
    }
}

fn drive(mut bytes: mpsc::Receiver<ByteChunk>, out: Handoff<ThreadRecord>, cell: ContinuationCell) {
    let state = Rc::new(RefCell::new(State {
        header: None,
        header_emitted: false,
        current: None,
        ancestors: Vec::new(),
        header_id: None,
        root_id: None,
        cell,
    }));

    let rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: header_handlers(&state, &out)
                .into_iter()
                .chain(comment_handlers(&state, &out))
                .collect(),
            ..Settings::new()
        },
        |_: &[u8]| {},
    );

    match pump(&mut bytes, rewriter) {
        PumpEnd::Completed => {
            let mut st = state.borrow_mut();
            // Comment-tree marker never fired (no comments) or page truncated.
            let _ = st.seal_header(&out).and_then(|_| st.seal_comment(&out));
            st.cell.resolve();
        }
        PumpEnd::Cancelled => state.borrow_mut().cell.resolve(),
        PumpEnd::Failed(e) => {
            out.fail(e);
            state.borrow_mut().cell.resolve();
        }
    }
}

type Handlers<'h> = Vec<(
    std::borrow::Cow<'static, lol_html::Selector>,
    lol_html::ElementContentHandlers<'h>,
)>;

fn header_handlers<'h>(state: &Rc<RefCell<State>>, out: &Handoff<ThreadRecord>) -> Handlers<'h> {
    vec![
        element!("table.fatitem tr.athing", {
            let st = Rc::clone(state);
            move |el| {
                st.borrow_mut().start_header(el.get_attribute("id"));
                Ok(())
            }
        }),
        element!("table.fatitem span.titleline > a", {
            let st = Rc::clone(state);
            move |el| {
                let href = el.get_attribute("href");
                st.borrow_mut().with_header(|h| {
                    h.url = href.clone();
                    h.title.reset();
                });
                Ok(())
            }
        }),
        text!("table.fatitem span.titleline > a", {
            let st = Rc::clone(state);
            move |t| {
                st.borrow_mut().with_header(|h| h.title.push_text(t.as_str()));
                Ok(())
            }
        }),
        text!("table.fatitem span.score", {
            let st = Rc::clone(state);
            move |t| {
                st.borrow_mut().with_header(|h| h.score.push_text(t.as_str()));
                Ok(())
            }
        }),
        text!("table.fatitem a.hnuser", {
            let st = Rc::clone(state);
            move |t| {
                st.borrow_mut().with_header(|h| h.author.push_text(t.as_str()));
                Ok(())
            }
        }),
        text!("table.fatitem span.age", {
            let st = Rc::clone(state);
            move |t| {
                st.borrow_mut().with_header(|h| h.age.push_text(t.as_str()));
                Ok(())
            }
        }),
        // Comments count: last item link of the story subtext wins.
        element!(r#"table.fatitem td.subtext a[href^="item?"]"#, {
            let st = Rc::clone(state);
            move |_el| {
                st.borrow_mut().with_header(|h| h.comments.reset());
                Ok(())
            }
        }),
        text!(r#"table.fatitem td.subtext a[href^="item?"]"#, {
            let st = Rc::clone(state);
            move |t| {
                st.borrow_mut().with_header(|h| h.comments.push_text(t.as_str()));
                Ok(())
            }
        }),
        // Nav links of a comment-focused header; the one labeled "parent"
        // carries the parent id.
        element!(r#"table.fatitem a[href^="item?"]"#, {
            let st = Rc::clone(state);
            move |el| {
                if let Some(href) = el.get_attribute("href") {
                    st.borrow_mut().with_header(|h| h.open_nav(&href));
                }
                Ok(())
            }
        }),
        text!(r#"table.fatitem a[href^="item?"]"#, {
            let st = Rc::clone(state);
            move |t| {
                st.borrow_mut().with_header(|h| {
                    if let Some((_, label)) = h.pending_nav.as_mut() {
                        label.push_text(t.as_str());
                    }
                });
                Ok(())
            }
        }),
        element!("table.fatitem span.onstory a", {
            let st = Rc::clone(state);
            move |el| {
                let root = el.get_attribute("href").as_deref().and_then(item_id);
                st.borrow_mut().with_header(|h| h.root_story_id = root);
                Ok(())
            }
        }),
        // Story self-text or focused comment body.
        element!("table.fatitem div.toptext", {
            let st = Rc::clone(state);
            move |_el| {
                st.borrow_mut().with_header(|h| {
                    h.body.reset();
                    h.has_body = true;
                });
                Ok(())
            }
        }),
        text!("table.fatitem div.toptext", {
            let st = Rc::clone(state);
            move |t| {
                st.borrow_mut().with_header(|h| h.body.push_text(t.as_str()));
                Ok(())
            }
        }),
        element!("table.fatitem div.toptext *", body_markup_handler(state, header_body_acc)),
        element!("table.fatitem div.commtext", {
            let st = Rc::clone(state);
            move |el| {
                let quality = el
                    .get_attribute("class")
                    .as_deref()
                    .and_then(Quality::from_class_attr);
                st.borrow_mut().with_header(|h| {
                    h.body.reset();
                    h.has_body = true;
                    h.quality = quality;
                });
                Ok(())
            }
        }),
        text!("table.fatitem div.commtext", {
            let st = Rc::clone(state);
            move |t| {
                st.borrow_mut().with_header(|h| h.body.push_text(t.as_str()));
                Ok(())
            }
        }),
        element!("table.fatitem div.commtext *", body_markup_handler(state, header_body_acc)),
        // Scoped terminal marker: the comment tree opening seals the header.
        element!("table.comment-tree", {
            let st = Rc::clone(state);
            let out = out.clone();
            move |_el| {
                st.borrow_mut().seal_header(&out)?;
                Ok(())
            }
        }),
    ]
}

fn comment_handlers<'h>(state: &Rc<RefCell<State>>, out: &Handoff<ThreadRecord>) -> Handlers<'h> {
    vec![
        element!("table.comment-tree tr.athing.comtr", {
            let st = Rc::clone(state);
            let out = out.clone();
            move |el| {
                let mut st = st.borrow_mut();
                st.seal_header(&out)?;
                st.seal_comment(&out)?;
                st.start_comment(el.get_attribute("id"));
                Ok(())
            }
        }),
        element!("table.comment-tree td.ind img", {
            let st = Rc::clone(state);
            move |el| {
                let width = el.get_attribute("width").and_then(|w| w.parse().ok());
                st.borrow_mut().with_comment(|c| c.indent_width = width);
                Ok(())
            }
        }),
        text!("table.comment-tree a.hnuser", {
            let st = Rc::clone(state);
            move |t| {
                st.borrow_mut().with_comment(|c| c.author.push_text(t.as_str()));
                Ok(())
            }
        }),
        text!("table.comment-tree span.age", {
            let st = Rc::clone(state);
            move |t| {
                st.borrow_mut().with_comment(|c| c.age.push_text(t.as_str()));
                Ok(())
            }
        }),
        element!("table.comment-tree div.commtext", {
            let st = Rc::clone(state);
            move |el| {
                let quality = el
                    .get_attribute("class")
                    .as_deref()
                    .and_then(Quality::from_class_attr);
                st.borrow_mut().with_comment(|c| {
                    c.body.reset();
                    c.quality = quality;
                });
                Ok(())
            }
        }),
        text!("table.comment-tree div.commtext", {
            let st = Rc::clone(state);
            move |t| {
                st.borrow_mut().with_comment(|c| c.body.push_text(t.as_str()));
                Ok(())
            }
        }),
        element!("table.comment-tree div.commtext *", body_markup_handler(state, comment_body_acc)),
        // Terminal marker doubles as the continuation anchor for deep threads.
        element!("a.morelink", {
            let st = Rc::clone(state);
            let out = out.clone();
            move |el| {
                let mut st = st.borrow_mut();
                st.seal_header(&out)?;
                st.seal_comment(&out)?;
                if let Some(href) = el.get_attribute("href") {
                    st.cell.capture(href);
                }
                Ok(())
            }
        }),
    ]
}

fn header_body_acc(st: &mut State) -> Option<&mut FieldAccumulator> {
    st.header.as_mut().map(|h| &mut h.body)
}

fn comment_body_acc(st: &mut State) -> Option<&mut FieldAccumulator> {
    st.current.as_mut().map(|c| &mut c.body)
}

/// Serialize nested inline elements back into the body accumulator, closing
/// them when their end-tag notifications fire.
fn body_markup_handler(
    state: &Rc<RefCell<State>>,
    acc: fn(&mut State) -> Option<&mut FieldAccumulator>,
) -> impl FnMut(&mut Element) -> lol_html::HandlerResult + 'static {
    let st = Rc::clone(state);
    move |el| {
        let name = el.tag_name();
        let attrs: Vec<(String, String)> = el
            .attributes()
            .iter()
            .map(|a| (a.name(), a.value()))
            .collect();
        if let Some(buf) = acc(&mut st.borrow_mut()) {
            buf.open_tag(&name, attrs.into_iter());
        }
        if !is_void_tag(&name) {
            if let Some(handlers) = el.end_tag_handlers() {
                let st = Rc::clone(&st);
                // Close with the element's own name: when the site leaves a
                // tag unclosed (its `<p>` separators), the notification that
                // ends it belongs to an enclosing element.
                handlers.push(Box::new(move |_end: &mut EndTag| {
                    if let Some(buf) = acc(&mut st.borrow_mut()) {
                        buf.close_tag(&name);
                    }
                    Ok(())
                }));
            }
        }
        Ok(())
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::fixture_source;
    use crate::normalize::DELETED_BODY;

    fn thread_fixture() -> String {
        std::fs::read_to_string("tests/fixtures/thread.html").unwrap()
    }

    async fn collect(html: &str, chunk_size: usize) -> (ThreadHeader, Vec<Comment>, String) {
        let mut thread = open(fixture_source(html, chunk_size)).await.unwrap();
        let mut comments = Vec::new();
        while let Some(item) = thread.comments.recv().await {
            comments.push(item.unwrap());
        }
        let token = thread.comments.continuation().await;
        (thread.header, comments, token)
    }

    #[tokio::test]
    async fn header_is_emitted_first_and_once() {
        let (header, comments, _) = collect(&thread_fixture(), 4096).await;
        assert_eq!(header.id, 9001);
        assert_eq!(header.title, "Ask HN: How do you review large diffs?");
        assert_eq!(header.author, "bob");
        assert_eq!(header.score, Some(44));
        assert_eq!(header.comment_count, Some(4));
        assert_eq!(header.kind, ListingKind::Story);
        assert_eq!(
            header.body.as_deref(),
            Some("<p>Mostly asking about tooling, not process.</p>")
        );
        assert_eq!(header.root_story_id, None);
        assert!(comments.iter().all(|c| c.id != header.id));
    }

    #[tokio::test]
    async fn comments_are_a_flat_depth_tagged_sequence() {
        let (_, comments, _) = collect(&thread_fixture(), 4096).await;
        let depths: Vec<u32> = comments.iter().map(|c| c.depth).collect();
        assert_eq!(depths, vec![0, 1, 0, 1]);

        let ids: Vec<u64> = comments.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2001, 2002, 2003, 2004]);

        // Parent derivation follows the depth stack; roots point at the story.
        assert_eq!(comments[0].parent_id, Some(9001));
        assert_eq!(comments[1].parent_id, Some(2001));
        assert_eq!(comments[2].parent_id, Some(9001));
        assert_eq!(comments[3].parent_id, Some(2003));
        assert!(comments.iter().all(|c| c.root_story_id == Some(9001)));
    }

    #[tokio::test]
    async fn bodies_are_reconstructed_and_normalized() {
        let (_, comments, _) = collect(&thread_fixture(), 4096).await;

        assert_eq!(comments[0].body, "<p>Stack the commits and review each one.</p>");
        assert_eq!(comments[0].quality, Some(Quality::Normal));

        // Quoted reply plus inline markup.
        assert_eq!(
            comments[1].body,
            "<blockquote>Stack the commits and review each one.</blockquote>\
             <p>That only works if the author <i>wrote</i> them that way.</p>"
        );

        assert_eq!(comments[2].quality, Some(Quality::Lowest));
        assert!(comments[2].body.contains("<a href=\"https://example.com/tool\">"));
    }

    #[tokio::test]
    async fn whitespace_body_is_the_deleted_placeholder() {
        let (_, comments, _) = collect(&thread_fixture(), 4096).await;
        let deleted = &comments[3];
        assert!(deleted.deleted);
        assert_eq!(deleted.body, DELETED_BODY);
        assert_eq!(deleted.author, "");
        assert!(comments[..3].iter().all(|c| !c.deleted));
    }

    #[tokio::test]
    async fn thread_continuation_is_captured() {
        let (_, _, token) = collect(&thread_fixture(), 4096).await;
        assert_eq!(token, "x?next=9");
    }

    #[tokio::test]
    async fn chunk_boundaries_do_not_change_the_output() {
        let html = thread_fixture();
        let whole = collect(&html, html.len()).await;
        let tiny = collect(&html, 7).await;
        assert_eq!(whole.0, tiny.0);
        assert_eq!(whole.1, tiny.1);
        assert_eq!(whole.2, tiny.2);
    }

    #[tokio::test]
    async fn comment_focused_header_carries_parent_and_root() {
        let html = r#"
        <table class="fatitem">
          <tr class='athing' id='88'>
            <td class="ind"></td>
            <td class="default">
              <span class="comhead">
                <a href="user?id=eve" class="hnuser">eve</a>
                <span class="age"><a href="item?id=88">1 hour ago</a></span>
                | <a href="item?id=77">parent</a>
                | <span class="onstory"> | on: <a href="item?id=42">The original story</a></span>
              </span>
              <div class="comment"><div class="commtext c00">A focused reply.</div></div>
            </td>
          </tr>
        </table>
        <table class="comment-tree">
          <tr class='athing comtr' id='89'>
            <td><table><tr>
              <td class='ind' indent='0'><img src="s.gif" height="1" width="0"></td>
              <td class="default">
                <span class="comhead"><a href="user?id=mallory" class="hnuser">mallory</a>
                  <span class="age"><a href="item?id=89">30 minutes ago</a></span></span>
                <div class="comment"><div class="commtext c00">Replying to the reply.</div></div>
              </td>
            </tr></table></td>
          </tr>
        </table>"#;
        let (header, comments, token) = collect(html, 64).await;
        assert_eq!(header.id, 88);
        assert_eq!(header.author, "eve");
        assert_eq!(header.parent_id, Some(77));
        assert_eq!(header.root_story_id, Some(42));
        assert_eq!(header.body.as_deref(), Some("<p>A focused reply.</p>"));
        assert_eq!(header.body_quality, Some(Quality::Normal));

        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].parent_id, Some(88));
        assert_eq!(comments[0].root_story_id, Some(42));
        assert_eq!(token, "");
    }

    #[tokio::test]
    async fn headerless_page_is_a_malformed_record() {
        let err = open(fixture_source("<html><body>No such item.</body></html>", 64))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::MalformedRecord(_)));
    }
}
