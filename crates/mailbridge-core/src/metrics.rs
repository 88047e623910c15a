//! Anonymous usage metrics.

/// Metric category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Installation and account setup.
    Setup,
}

/// Metric action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// An account was added for the first time.
    NewUser,
    /// The application started for the first time.
    FirstStart,
}

/// A `(category, action, label)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metric {
    category: Category,
    action: Action,
    label: &'static str,
}

impl Metric {
    /// Label used when a metric carries no label.
    pub const NO_LABEL: &'static str = "";

    /// Creates a metric.
    #[must_use]
    pub const fn new(category: Category, action: Action, label: &'static str) -> Self {
        Self {
            category,
            action,
            label,
        }
    }

    /// Metric sent when an account is added.
    #[must_use]
    pub const fn new_user() -> Self {
        Self::new(Category::Setup, Action::NewUser, Self::NO_LABEL)
    }

    /// Returns the wire form of the triple.
    #[must_use]
    pub const fn get(&self) -> (&'static str, &'static str, &'static str) {
        let category = match self.category {
            Category::Setup => "setup",
        };
        let action = match self.action {
            Action::NewUser => "new_user",
            Action::FirstStart => "first_start",
        };
        (category, action, self.label)
    }
}
