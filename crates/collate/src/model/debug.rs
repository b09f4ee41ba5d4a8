//! Text rendering of entry sequences.
//!
//! [`EntryTreeDebug`] draws the flat entry sequence of a virtual collection
//! as the tree it represents. It is used for trace logging of rebuilds and
//! is handy in test failure messages.
//!
//! ```
//! use collate::model::{EntryTreeDebug, TreeFormatOptions, TreeStyle};
//!
//! let debug = EntryTreeDebug::with_options(TreeFormatOptions {
//!     style: TreeStyle::Ascii,
//!     ..TreeFormatOptions::minimal()
//! });
//! assert_eq!(debug.format(&[]), "");
//! ```

use std::fmt::Write;

use super::value::Value;
use super::virtual_collection::Entry;

/// Style of the branch characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeStyle {
    /// ASCII characters for tree branches.
    Ascii,
    /// Unicode box-drawing characters.
    #[default]
    Unicode,
    /// Indentation and dashes only.
    Compact,
}

/// Configuration for [`EntryTreeDebug`].
#[derive(Debug, Clone)]
pub struct TreeFormatOptions {
    /// The style of tree visualization.
    pub style: TreeStyle,
    /// Whether to append entry ids.
    pub show_ids: bool,
    /// Attribute used as the label of record entries. Records without it
    /// are labelled with their id.
    pub label_attribute: Option<String>,
    /// Spaces added per level after the branch character.
    pub indent_size: usize,
}

impl Default for TreeFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::default(),
            show_ids: true,
            label_attribute: None,
            indent_size: 2,
        }
    }
}

impl TreeFormatOptions {
    /// Labels only, read from the `title` attribute.
    pub fn minimal() -> Self {
        Self {
            show_ids: false,
            label_attribute: Some("title".to_string()),
            ..Default::default()
        }
    }
}

/// Renders entry sequences as indented trees.
#[derive(Debug, Clone, Default)]
pub struct EntryTreeDebug {
    options: TreeFormatOptions,
}

impl EntryTreeDebug {
    /// Create a renderer with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a renderer with custom options.
    pub fn with_options(options: TreeFormatOptions) -> Self {
        Self { options }
    }

    /// Render `entries`, one line per entry.
    pub fn format(&self, entries: &[Entry]) -> String {
        let mut output = String::new();
        // For each ancestor level, whether more siblings follow it.
        let mut open: Vec<bool> = Vec::new();

        for (index, entry) in entries.iter().enumerate() {
            let level = entry.level();
            let is_last = is_last_sibling(entries, index);
            open.truncate(level);

            output.push_str(&self.build_prefix(&open, is_last));
            output.push_str(&self.label(entry));
            output.push('\n');

            // Entries skipping a level have no visible parent there.
            open.resize(level, false);
            open.push(!is_last);
        }
        output
    }

    fn label(&self, entry: &Entry) -> String {
        let mut label = match entry {
            Entry::Group(group) if group.display_text().is_empty() => "(empty)".to_string(),
            Entry::Group(group) => group.display_text().to_string(),
            Entry::Record { record, .. } => match &self.options.label_attribute {
                Some(name) => match record.get(name) {
                    Value::Null => format!("#{}", record.id()),
                    value => value.to_string(),
                },
                None => format!("#{}", record.id()),
            },
        };
        if self.options.show_ids {
            let _ = write!(label, " [{}]", entry.id());
        }
        label
    }

    /// Build the prefix string for an entry below the `open` ancestors.
    fn build_prefix(&self, open: &[bool], is_last: bool) -> String {
        if open.is_empty() {
            return String::new();
        }

        let (branch, tee, corner) = match self.options.style {
            TreeStyle::Ascii => ("|", "+--", "`--"),
            TreeStyle::Unicode => ("\u{2502}", "\u{251c}\u{2500}\u{2500}", "\u{2514}\u{2500}\u{2500}"),
            TreeStyle::Compact => ("", "-", "-"),
        };
        let gap = " ".repeat(branch.chars().count());

        let mut prefix = String::new();
        for &more in &open[1..] {
            prefix.push_str(if more { branch } else { &gap });
            prefix.push_str(&" ".repeat(self.options.indent_size));
        }
        prefix.push_str(if is_last { corner } else { tee });
        prefix.push(' ');
        prefix
    }
}

/// Whether no later sibling shares the entry's parent.
fn is_last_sibling(entries: &[Entry], index: usize) -> bool {
    let level = entries[index].level();
    entries[index + 1..]
        .iter()
        .find(|entry| entry.level() <= level)
        .is_none_or(|next| next.level() < level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Collection, GroupingRule, Record, RecordId, VirtualCollection};
    use std::sync::Arc;

    fn view() -> VirtualCollection<Collection> {
        let parent = Record::with_id(RecordId::new(1), [("title", "a"), ("status", "open")]);
        parent.set_children(Some(Arc::new(
            Collection::new(vec![Record::with_id(RecordId::new(4), [("title", "a.1"), ("status", "open")])])
                .unwrap(),
        )));
        let source = Arc::new(
            Collection::new(vec![
                parent,
                Record::with_id(RecordId::new(2), [("title", "b"), ("status", "done")]),
                Record::with_id(RecordId::new(3), [("title", "c"), ("status", "open")]),
            ])
            .unwrap(),
        );
        VirtualCollection::builder(source)
            .grouping(GroupingRule::by_attribute("status"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_unicode_tree() {
        let view = view();
        let debug = EntryTreeDebug::with_options(TreeFormatOptions::minimal());

        let expected = "\
open
\u{251c}\u{2500}\u{2500} a
\u{2502}  \u{2514}\u{2500}\u{2500} a.1
\u{2514}\u{2500}\u{2500} c
done
\u{2514}\u{2500}\u{2500} b
";
        assert_eq!(debug.format(&view.entries()), expected);
    }

    #[test]
    fn test_ascii_tree() {
        let view = view();
        let debug = EntryTreeDebug::with_options(TreeFormatOptions {
            style: TreeStyle::Ascii,
            ..TreeFormatOptions::minimal()
        });

        let expected = "open\n+-- a\n|  `-- a.1\n`-- c\ndone\n`-- b\n";
        assert_eq!(debug.format(&view.entries()), expected);
    }

    #[test]
    fn test_ids_and_fallback_labels() {
        let source = Arc::new(Collection::new(vec![Record::with_id(RecordId::new(9), [("x", 1)])]).unwrap());
        let view = VirtualCollection::new(source);

        assert_eq!(EntryTreeDebug::new().format(&view.entries()), "#9 [9]\n");
        assert_eq!(view.debug_tree(), "#9 [9]\n");
    }

    #[test]
    fn test_compact_tree() {
        let view = view();
        let debug = EntryTreeDebug::with_options(TreeFormatOptions {
            style: TreeStyle::Compact,
            indent_size: 1,
            ..TreeFormatOptions::minimal()
        });

        let expected = "open\n- a\n - a.1\n- c\ndone\n- b\n";
        assert_eq!(debug.format(&view.entries()), expected);
    }
}
