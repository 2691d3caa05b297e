use crate::abbrev::preview;
use crate::event::{COMMENT, GENERIC_REPOST, HIGHLIGHT, REPOST, TEXT_NOTE};
use crate::profiles::ProfileCache;
use crate::tree::{Thread, ThreadNode};
use std::fmt::Write;

const PREVIEW_SIZE: usize = 80;
const INDENT: &str = "  ";

fn kind_label(kind: u16) -> Option<String> {
    match kind {
        TEXT_NOTE => None,
        COMMENT => Some("comment".to_owned()),
        REPOST | GENERIC_REPOST => Some("repost".to_owned()),
        HIGHLIGHT => Some("highlight".to_owned()),
        other => Some(format!("kind {}", other)),
    }
}

fn render_node(out: &mut String, node: &ThreadNode, profiles: &ProfileCache, max_indent: usize) {
    let ev = node.event();

    for _ in 0..node.indent(max_indent) {
        out.push_str(INDENT);
    }
    let _ = write!(out, "@{}", profiles.label(&ev.author));
    if let Some(label) = kind_label(ev.kind) {
        let _ = write!(out, " [{}]", label);
    }

    let text = preview(&ev.content, PREVIEW_SIZE);
    if !text.is_empty() {
        let _ = write!(out, ": {}", text);
    }
    out.push('\n');
}

/// One line per reply in display order
pub fn render_thread(thread: &Thread, profiles: &ProfileCache, max_indent: usize) -> String {
    let mut out = String::new();
    for node in thread.iter() {
        render_node(&mut out, node, profiles, max_indent);
    }
    out
}
