//! Property schema shown by the host's source settings dialog.

use crate::settings::{KEY_LOCATION, KEY_STOP_ON_HIDE, KEY_SYNC_COPY};

/// Name of the "Apply" button that re-runs `update`.
pub const APPLY_BUTTON: &str = "apply";

/// Only push settings to the source when the user confirms.
pub const DEFER_UPDATE: u32 = 1 << 0;

/// Kind of a single property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    Bool,
    Text,
    Button,
}

/// One entry in the property schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: PropertyKind,
}

/// Ordered property list plus host flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Properties {
    pub flags: u32,
    items: Vec<Property>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bool(&mut self, name: &'static str, description: &'static str) {
        self.push(name, description, PropertyKind::Bool);
    }

    pub fn add_text(&mut self, name: &'static str, description: &'static str) {
        self.push(name, description, PropertyKind::Text);
    }

    pub fn add_button(&mut self, name: &'static str, description: &'static str) {
        self.push(name, description, PropertyKind::Button);
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.items.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.items.iter()
    }

    fn push(&mut self, name: &'static str, description: &'static str, kind: PropertyKind) {
        self.items.push(Property {
            name,
            description,
            kind,
        });
    }
}

/// Builds the schema for the video source.
pub fn source_properties() -> Properties {
    let mut props = Properties::new();
    props.flags |= DEFER_UPDATE;

    props.add_text(KEY_LOCATION, "URL");
    props.add_bool(KEY_STOP_ON_HIDE, "Stop pipeline when hidden");
    props.add_bool(KEY_SYNC_COPY, "Wait for GPU copy on every frame");
    props.add_button(APPLY_BUTTON, "Apply");
    props
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_properties_schema() {
        let props = source_properties();
        assert_eq!(props.flags & DEFER_UPDATE, DEFER_UPDATE);

        let stop = props.get(KEY_STOP_ON_HIDE).expect("stop_on_hide property");
        assert_eq!(stop.kind, PropertyKind::Bool);
        assert_eq!(stop.description, "Stop pipeline when hidden");

        let apply = props.get(APPLY_BUTTON).expect("apply button");
        assert_eq!(apply.kind, PropertyKind::Button);

        // Apply comes last so it sits under the options it confirms.
        assert_eq!(props.iter().last().map(|p| p.name), Some(APPLY_BUTTON));
    }
}
