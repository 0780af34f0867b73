//! Heading hierarchy tracking for chunk metadata.

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeadingEntry {
    level: u8,
    title: String,
}

/// Tracks the stack of section titles seen so far in a document.
///
/// Cloning produces an independent copy, used when forking overlap contexts.
#[derive(Debug, Clone, Default)]
pub struct HeadingStack {
    items: Vec<HeadingEntry>,
}

impl HeadingStack {
    pub fn new() -> Self {
        Self {
            items: Vec::with_capacity(8),
        }
    }

    /// Apply markdown heading hierarchy rules: a level-1 heading resets the
    /// stack; otherwise entries at the same or deeper level are popped first.
    pub fn update(&mut self, level: u8, title: &str) {
        if level < 1 {
            return;
        }
        let title = title.trim().to_string();
        if level == 1 {
            self.items.clear();
            self.items.push(HeadingEntry { level, title });
            return;
        }
        while self
            .items
            .last()
            .map(|entry| entry.level >= level)
            .unwrap_or(false)
        {
            self.items.pop();
        }
        self.items.push(HeadingEntry { level, title });
    }

    /// Non-empty titles joined with `" > "`.
    pub fn breadcrumb(&self) -> String {
        self.items
            .iter()
            .filter(|entry| !entry.title.is_empty())
            .map(|entry| entry.title.as_str())
            .collect::<Vec<_>>()
            .join(" > ")
    }

    /// The most specific (top of stack) section title.
    pub fn section_title(&self) -> String {
        self.items
            .last()
            .map(|entry| entry.title.clone())
            .unwrap_or_default()
    }
}
