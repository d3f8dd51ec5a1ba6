//! Collaborator traits for the voice chat engine
//!
//! Every external service the turn-taking core talks to sits behind one of
//! these traits, so backends can be swapped and tests can use mocks.
//!
//! ```text
//! Speech:
//!   - RecognitionClient: streaming audio → transcript events
//!   - SynthesisClient: text segment → playable audio reference
//!
//! Agent:
//!   - AgentClient: utterance → reply, with session continuity
//!
//! Playback:
//!   - AudioSink: start/poll/stop a single audio artifact
//!
//! Persistence:
//!   - ConversationLog: one record per completed turn
//!
//! Notifications:
//!   - TurnListener: constructor-injected turn callbacks
//! ```

mod agent;
mod listener;
mod persistence;
mod playback;
mod speech;

pub use agent::{AgentClient, AgentReply, AgentRequest};
pub use listener::{NoopListener, TurnListener};
pub use persistence::ConversationLog;
pub use playback::AudioSink;
pub use speech::{RecognitionClient, SynthesisClient, TranscriptStream};
