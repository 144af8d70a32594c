//! Declarative attribute surface.
//!
//! All recognized attributes share one prefix (`s-` by default). Fixed names
//! cover actions, text, model, focus and collections; the dataset and
//! attribute families are matched by prefix and carry their target in the
//! suffix (`s-data-state`, `s-attr-disabled`).

pub const DEFAULT_PREFIX: &str = "s-";

const CLICK: &str = "click";
const BLUR: &str = "blur";
const ENTER: &str = "enter";
const TEXT: &str = "text";
const MODEL: &str = "model";
const FOCUS: &str = "focus";
const EACH: &str = "each";
const DATA_FAMILY: &str = "data-";
const ATTR_FAMILY: &str = "attr-";

/// What a binding attribute drives on its element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Text,
    Model,
    Focus,
    /// Target key inside the element's dataset.
    Dataset(String),
    /// Target attribute name.
    Attribute(String),
}

/// The interaction an action attribute reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTrigger {
    Click,
    Blur,
    Enter,
}

impl ActionTrigger {
    pub const ALL: [ActionTrigger; 3] = [
        ActionTrigger::Click,
        ActionTrigger::Blur,
        ActionTrigger::Enter,
    ];

    fn suffix(self) -> &'static str {
        match self {
            ActionTrigger::Click => CLICK,
            ActionTrigger::Blur => BLUR,
            ActionTrigger::Enter => ENTER,
        }
    }
}

/// Attribute names resolved against one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSurface {
    prefix: String,
}

impl Default for AttributeSurface {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl AttributeSurface {
    /// Markup parsing lowercases attribute names, so the prefix is too.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_ascii_lowercase(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn action(&self, trigger: ActionTrigger) -> String {
        format!("{}{}", self.prefix, trigger.suffix())
    }

    pub fn each(&self) -> String {
        format!("{}{}", self.prefix, EACH)
    }

    /// Classify a binding attribute; actions, collections and foreign
    /// attributes yield `None`.
    pub fn classify(&self, name: &str) -> Option<Directive> {
        let rest = name.strip_prefix(self.prefix.as_str())?;
        match rest {
            TEXT => Some(Directive::Text),
            MODEL => Some(Directive::Model),
            FOCUS => Some(Directive::Focus),
            _ => {
                if let Some(key) = rest.strip_prefix(DATA_FAMILY) {
                    return (!key.is_empty()).then(|| Directive::Dataset(key.to_string()));
                }
                if let Some(attr) = rest.strip_prefix(ATTR_FAMILY) {
                    return (!attr.is_empty()).then(|| Directive::Attribute(attr.to_string()));
                }
                None
            }
        }
    }
}
