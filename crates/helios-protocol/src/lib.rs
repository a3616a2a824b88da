//! Shared types for the Helios client.
//!
//! - [`models`]: domain records (tasks, plans, agent messages, users, challenges)
//!   as the Helios service serializes them.
//! - [`events`]: the realtime wire envelope, the closed set of inbound event
//!   kinds, and outbound messages.

pub mod events;
pub mod models;

pub use events::{
    ConnectionEstablished, DecodeError, EventKind, FeedbackProcessed, HistoryRecord, InboundEvent,
    OutboundMessage, PlanUpdated, StatusChange, TaskStatusChanged,
};
pub use models::{
    AgentMessage, AgentMessagePayload, AgentRole, Challenge, ChallengeCategory, ChallengeReward,
    MessageKind, MessageMetadata, ModelPreference, Plan, PlanPatch, PlanUpdate, Priority, Task,
    TaskPatch, TaskStatus, Theme, User, UserPreferences,
};
