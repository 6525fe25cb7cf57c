//! Local media tracks
//!
//! Acquired once per session and attached to every link created afterwards.
//! Muting flips a shared flag; samples written while a track is disabled
//! are dropped, so no renegotiation is needed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// One local track plus its enabled flag
pub struct MediaTrack {
    kind: MediaKind,
    track: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
}

impl MediaTrack {
    fn new(kind: MediaKind, stream_id: &str) -> Self {
        let mime_type = match kind {
            MediaKind::Audio => MIME_TYPE_OPUS,
            MediaKind::Video => MIME_TYPE_VP8,
        };

        let track = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            kind.as_str().to_owned(),
            stream_id.to_owned(),
        );

        Self {
            kind,
            track: Arc::new(track),
            enabled: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> MediaKind {
        self.kind
    }

    #[must_use]
    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Push one encoded frame to every bound link.
    ///
    /// Returns `false` when the track is disabled and the frame was dropped.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<bool> {
        if !self.is_enabled() {
            debug!(kind = self.kind.as_str(), "Track disabled, sample dropped");
            return Ok(false);
        }

        self.track
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await?;
        Ok(true)
    }
}

/// Microphone and camera tracks of the local participant
pub struct LocalMedia {
    audio: MediaTrack,
    video: MediaTrack,
}

impl LocalMedia {
    #[must_use]
    pub fn new(stream_id: &str) -> Self {
        Self {
            audio: MediaTrack::new(MediaKind::Audio, stream_id),
            video: MediaTrack::new(MediaKind::Video, stream_id),
        }
    }

    #[must_use]
    pub const fn audio(&self) -> &MediaTrack {
        &self.audio
    }

    #[must_use]
    pub const fn video(&self) -> &MediaTrack {
        &self.video
    }

    /// Every track, in the order links attach them
    #[must_use]
    pub fn tracks(&self) -> [&MediaTrack; 2] {
        [&self.audio, &self.video]
    }
}
