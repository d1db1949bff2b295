//! Sub-stage state machine of a refresh pass
//!
//! ```text
//! LIST_REMOTE -> QUERY_LOCAL -> UPDATE_LOCAL -> CREATE_LOCAL -+-> LIST_REMOTE (next page)
//!                          \______________/________________/  |
//!                                                             +-> DELETE_LOCAL -> FINISHED
//! ```
//!
//! Transitions are a pure function of the facts gathered about the current
//! page so they can be tested without any I/O.

/// Facts about the current page that drive transitions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageFacts {
    /// Remote ids of this page with a local counterpart
    pub matched: usize,
    /// Remote ids of this page without a local counterpart
    pub new: usize,
    /// Whether the remote source returned a cursor for another page
    pub has_next_page: bool,
}

/// Step of the per-page reconciliation loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubStage {
    ListRemote,
    QueryLocal,
    UpdateLocal,
    CreateLocal,
    DeleteLocal,
    Finished,
}

impl SubStage {
    /// Returns the stage that follows `self` given the page facts
    pub fn next(self, facts: &PageFacts) -> SubStage {
        match self {
            SubStage::ListRemote => SubStage::QueryLocal,
            SubStage::QueryLocal if facts.matched > 0 => SubStage::UpdateLocal,
            SubStage::QueryLocal | SubStage::UpdateLocal if facts.new > 0 => SubStage::CreateLocal,
            SubStage::QueryLocal | SubStage::UpdateLocal | SubStage::CreateLocal => {
                Self::after_page(facts)
            }
            SubStage::DeleteLocal | SubStage::Finished => SubStage::Finished,
        }
    }

    fn after_page(facts: &PageFacts) -> SubStage {
        if facts.has_next_page {
            SubStage::ListRemote
        } else {
            SubStage::DeleteLocal
        }
    }

    pub fn is_terminal(self) -> bool {
        self == SubStage::Finished
    }

    /// Label used in logs
    pub fn label(self) -> &'static str {
        match self {
            SubStage::ListRemote => "LIST_REMOTE",
            SubStage::QueryLocal => "QUERY_LOCAL",
            SubStage::UpdateLocal => "UPDATE_LOCAL",
            SubStage::CreateLocal => "CREATE_LOCAL",
            SubStage::DeleteLocal => "DELETE_LOCAL",
            SubStage::Finished => "FINISHED",
        }
    }

    /// Label qualified by the adapter's resource noun, e.g. `LIST_REMOTE_VMS`
    pub fn label_for(self, noun: &str) -> String {
        match self {
            SubStage::Finished => self.label().to_string(),
            _ => format!("{}_{}", self.label(), noun),
        }
    }
}

impl std::fmt::Display for SubStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}
