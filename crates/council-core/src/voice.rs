//! Narrow seam to the voice-synthesis and playback collaborator.
//!
//! The council only hands finished advisor text to this interface, is told
//! when playback starts and stops, and can cut playback short. Synthesis vendors and audio devices live
//! behind the trait.

use async_trait::async_trait;

use crate::backend::ByteStream;
use crate::messages::AdvisorId;

/// Encoded audio produced for one advisor message.
pub type AudioStream = ByteStream;

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("voice synthesis failed: {0}")]
    Synthesis(String),
    #[error("playback failed: {0}")]
    Playback(String),
}

#[async_trait]
pub trait VoiceCollaborator: Send + Sync {
    /// Request synthesized audio for an advisor's final text.
    async fn request_audio(&self, advisor: AdvisorId, text: &str) -> Result<AudioStream, VoiceError>;

    /// Play audio to completion. Resolves when playback stops.
    async fn playback(&self, advisor: AdvisorId, audio: AudioStream) -> Result<(), VoiceError>;

    /// Silence whatever is playing for `advisor`. Called when its turn is
    /// cancelled mid-playback; must not block.
    fn stop(&self, advisor: AdvisorId);
}
