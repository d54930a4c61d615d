//! Parked attachments awaiting a disposition.
//!
//! A decoded attachment is not written anywhere on arrival. It is parked
//! here under an [`OfferId`] and announced to the user, who later accepts it
//! (saving it to a path) or discards it. Reader tasks never wait on that
//! decision.

use crate::error::ProtocolError;
use crate::frame::{Frame, PeerId};
use bytes::Bytes;
use dashmap::DashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// File name used when an offered name has no usable final component.
const FALLBACK_FILE_NAME: &str = "attachment";

/// Identifier of a parked attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OfferId(pub u64);

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for OfferId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse().map(OfferId)
    }
}

/// An attachment waiting for the user's decision.
#[derive(Debug, Clone)]
pub struct AttachmentOffer {
    pub id: OfferId,
    /// Sending peer, when known.
    pub from: Option<PeerId>,
    pub file_name: String,
    /// Size declared by the sender.
    pub size: u64,
    pub payload: Bytes,
}

/// What to do with a parked attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Write the payload to this path.
    Accept(PathBuf),
    Discard,
}

/// Result of applying a disposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Saved { path: PathBuf, bytes: usize },
    Discarded,
}

/// Store of attachments awaiting a disposition.
pub struct PendingAttachments {
    next_id: AtomicU64,
    offers: DashMap<OfferId, AttachmentOffer>,
}

impl PendingAttachments {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            offers: DashMap::new(),
        }
    }

    /// Parks a decoded attachment frame and returns the offer to announce.
    pub fn park(&self, from: Option<PeerId>, frame: Frame) -> AttachmentOffer {
        let id = OfferId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let offer = AttachmentOffer {
            id,
            from,
            file_name: frame
                .name
                .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string()),
            size: frame.declared_size,
            payload: frame.payload,
        };
        self.offers.insert(id, offer.clone());
        offer
    }

    /// Parks an attachment from `peer` unless that peer already has `limit`
    /// offers waiting.
    ///
    /// Only the peer's own reader task parks its offers, so the count cannot
    /// move between the check and the insert.
    pub fn park_limited(
        &self,
        peer: PeerId,
        frame: Frame,
        limit: usize,
    ) -> Result<AttachmentOffer, ProtocolError> {
        if self.count_from(peer) >= limit {
            return Err(ProtocolError::PendingLimit { peer, limit });
        }
        Ok(self.park(Some(peer), frame))
    }

    /// Returns how many offers from `peer` are waiting.
    pub fn count_from(&self, peer: PeerId) -> usize {
        self.offers
            .iter()
            .filter(|entry| entry.from == Some(peer))
            .count()
    }

    /// Drops every offer from `peer` and returns how many were dropped.
    pub fn discard_from(&self, peer: PeerId) -> usize {
        let mut dropped = 0;
        self.offers.retain(|_, offer| {
            let keep = offer.from != Some(peer);
            if !keep {
                dropped += 1;
            }
            keep
        });
        dropped
    }

    /// Returns a parked offer.
    pub fn get(&self, id: OfferId) -> Option<AttachmentOffer> {
        self.offers.get(&id).map(|r| r.clone())
    }

    /// Applies a disposition to a parked offer.
    ///
    /// A failed write leaves the offer parked so it can be retried.
    pub async fn resolve(
        &self,
        id: OfferId,
        disposition: Disposition,
    ) -> Result<Resolution, ProtocolError> {
        let (_, offer) = self
            .offers
            .remove(&id)
            .ok_or(ProtocolError::OfferNotFound(id))?;

        let path = match disposition {
            Disposition::Discard => {
                tracing::debug!("Discarded attachment {} ({})", id, offer.file_name);
                return Ok(Resolution::Discarded);
            }
            Disposition::Accept(path) => path,
        };

        match write_payload(&path, &offer.payload).await {
            Ok(()) => {
                tracing::info!(
                    "Saved attachment {} ({} bytes) to {}",
                    id,
                    offer.payload.len(),
                    path.display()
                );
                Ok(Resolution::Saved {
                    path,
                    bytes: offer.payload.len(),
                })
            }
            Err(source) => {
                self.offers.insert(id, offer);
                Err(ProtocolError::AttachmentWrite { path, source })
            }
        }
    }

    /// Returns the number of parked offers.
    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }
}

impl Default for PendingAttachments {
    fn default() -> Self {
        Self::new()
    }
}

async fn write_payload(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, payload).await
}

/// Builds a save path inside `dir`, keeping only the final component of the
/// offered name so a sender cannot choose where the file lands.
pub fn default_save_path(dir: &Path, file_name: &str) -> PathBuf {
    let name = Path::new(file_name)
        .file_name()
        .filter(|n| !n.is_empty())
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| FALLBACK_FILE_NAME.into());
    dir.join(name)
}
