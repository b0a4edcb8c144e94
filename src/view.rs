//! Markup produced by popup components.
//!
//! Components render into an [`Element`] tree; the terminal renderer draws it
//! and clicks are routed back by element id. Rendering is pure, so components
//! can be tested without a terminal.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub tag: &'static str,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: BTreeMap<String, String>,
    pub text: Option<String>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(tag: &'static str) -> Self {
        Self { tag, ..Default::default() }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    /// Boolean attribute, present only when `on`.
    pub fn flag(mut self, name: &str, on: bool) -> Self {
        if on {
            self.attrs.insert(name.to_string(), String::new());
        } else {
            self.attrs.remove(name);
        }
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn is_hidden(&self) -> bool {
        self.attrs.contains_key("hidden")
    }

    pub fn is_disabled(&self) -> bool {
        self.attrs.contains_key("disabled")
    }

    #[cfg(test)]
    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        if self.id.as_deref() == Some(id) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_by_id(id))
    }

    /// All descendants (and self) matching `pred`, in document order.
    #[cfg(test)]
    pub fn find_all<'a>(&'a self, pred: &dyn Fn(&Element) -> bool) -> Vec<&'a Element> {
        let mut out = Vec::new();
        self.collect(pred, &mut out);
        out
    }

    #[cfg(test)]
    fn collect<'a>(&'a self, pred: &dyn Fn(&Element) -> bool, out: &mut Vec<&'a Element>) {
        if pred(self) {
            out.push(self);
        }
        for c in &self.children {
            c.collect(pred, out);
        }
    }

    /// Concatenated text of this subtree.
    pub fn text_content(&self) -> String {
        let mut out = self.text.clone().unwrap_or_default();
        for c in &self.children {
            out.push_str(&c.text_content());
        }
        out
    }
}

/// A component that renders itself to an element tree.
pub trait View {
    fn render(&self) -> Element;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nested_ids_and_text() {
        let tree = Element::new("div").with_id("root").child(
            Element::new("button")
                .with_id("go")
                .class("primary")
                .flag("disabled", true)
                .text("Go <now>"),
        );
        let button = tree.find_by_id("go").unwrap();
        assert!(button.is_disabled());
        assert_eq!(tree.text_content(), "Go <now>");
        assert!(tree.find_by_id("missing").is_none());
    }

    #[test]
    fn flag_can_be_removed() {
        let el = Element::new("div").flag("hidden", true).flag("hidden", false);
        assert!(!el.is_hidden());
    }
}
