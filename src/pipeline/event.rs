//! Progress events emitted while a run advances.

use super::result::{MessageOutcome, Summary};

/// One progress notification. Front-ends decide how to render it.
#[derive(Debug, Clone, Copy)]
pub enum PipelineEvent<'a> {
    /// `done` of `total` listed messages fetched.
    FetchProgress { done: usize, total: usize },
    /// Grouping finished.
    GroupsReady { senders: usize, messages: usize },
    /// The apply stage is starting on `messages` messages in delete groups.
    ApplyStarted { senders: usize, messages: usize },
    /// One message in a delete group reached its final outcome.
    MessageApplied {
        sender_key: &'a str,
        id: &'a str,
        outcome: &'a MessageOutcome,
    },
    /// The run reached a terminal stage.
    Finished { summary: &'a Summary },
}

/// Callback receiving [`PipelineEvent`]s, possibly from several worker threads.
pub type EventSink = Box<dyn Fn(&PipelineEvent<'_>) + Send + Sync>;
