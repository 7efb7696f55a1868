//! Tag-like markup fragments consumed by the rendering surface.

/// Escape a value for use inside a double-quoted attribute.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Escape free text content between tags.
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

/// Builder for a single element. Attribute values are escaped on output.
#[derive(Clone, Debug)]
pub struct Tag {
    name: &'static str,
    attrs: Vec<(&'static str, String)>,
}

impl Tag {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            attrs: Vec::new(),
        }
    }

    pub fn attr(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.attrs.push((key, value.into()));
        self
    }

    pub fn attr_opt(self, key: &'static str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.attr(key, v),
            None => self,
        }
    }

    pub fn attr_if(self, cond: bool, key: &'static str, value: &str) -> Self {
        if cond {
            self.attr(key, value)
        } else {
            self
        }
    }

    pub fn open(&self) -> String {
        let mut out = format!("<{}", self.name);
        for (key, value) in &self.attrs {
            out.push_str(&format!(" {key}=\"{}\"", escape_attr(value)));
        }
        out.push('>');
        out
    }

    pub fn close(&self) -> String {
        format!("</{}>", self.name)
    }

    /// Open tag, raw body, close tag. `body` must already be escaped.
    pub fn wrap(&self, body: &str) -> String {
        format!("{}{body}{}", self.open(), self.close())
    }

    pub fn empty(&self) -> String {
        self.wrap("")
    }
}
