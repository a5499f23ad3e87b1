//! Bookkeeping for in-flight and queued downloads.
//!
//! Everything here is plain data guarded by the downloader's mutex; no I/O happens
//! while it is held.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::domain::entities::ImageRequest;
use crate::domain::ports::ImageFilter;

use super::downloader::DownloadResponse;

/// Completion handler for one registration.
pub type Completion = Box<dyn FnOnce(DownloadResponse) + Send + 'static>;

/// Which queued download starts first when a slot frees up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QueueOrder {
    /// First enqueued, first started.
    #[default]
    Fifo,
    /// Most recently enqueued, first started.
    Lifo,
}

/// One caller's interest in a download.
pub struct Registration {
    pub receipt_id: Uuid,
    pub request: ImageRequest,
    pub filter: Option<Arc<dyn ImageFilter>>,
    pub completion: Completion,
}

struct PendingDownload {
    download_id: Uuid,
    request: ImageRequest,
    registrations: Vec<Registration>,
    /// Present once the download is active.
    cancel_tx: Option<oneshot::Sender<()>>,
}

/// Everything a worker needs to run a download that just became active.
pub struct StartTicket {
    pub identifier: String,
    pub download_id: Uuid,
    pub request: ImageRequest,
    pub cancel_rx: oneshot::Receiver<()>,
}

/// Result of removing one registration.
pub enum CancelOutcome {
    /// The download already finished or the receipt is stale.
    NotFound,
    /// The registration was removed. `cancel_tx` is set when it was the last one on an
    /// active download and the underlying operation must be stopped.
    Removed {
        registration: Registration,
        cancel_tx: Option<oneshot::Sender<()>>,
    },
}

pub struct DownloadQueue {
    pending: HashMap<String, PendingDownload>,
    queued: VecDeque<String>,
    active_count: usize,
    maximum_active_downloads: usize,
    order: QueueOrder,
}

impl DownloadQueue {
    pub fn new(maximum_active_downloads: usize, order: QueueOrder) -> Self {
        Self {
            pending: HashMap::new(),
            queued: VecDeque::new(),
            active_count: 0,
            maximum_active_downloads,
            order,
        }
    }

    pub const fn active_count(&self) -> usize {
        self.active_count
    }

    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Appends to an existing download. Hands the registration back if there is none.
    pub fn join(
        &mut self,
        identifier: &str,
        registration: Registration,
    ) -> Result<Uuid, Registration> {
        match self.pending.get_mut(identifier) {
            Some(pending) => {
                pending.registrations.push(registration);
                Ok(pending.download_id)
            }
            None => Err(registration),
        }
    }

    /// Creates a download, activating it immediately when a slot is free and queueing
    /// it otherwise.
    pub fn insert(
        &mut self,
        identifier: String,
        request: ImageRequest,
        registration: Registration,
    ) -> (Uuid, Option<StartTicket>) {
        let download_id = Uuid::new_v4();
        self.pending.insert(
            identifier.clone(),
            PendingDownload {
                download_id,
                request,
                registrations: vec![registration],
                cancel_tx: None,
            },
        );

        if self.has_free_slot() {
            (download_id, self.activate(&identifier))
        } else {
            match self.order {
                QueueOrder::Fifo => self.queued.push_back(identifier),
                QueueOrder::Lifo => self.queued.push_front(identifier),
            }
            (download_id, None)
        }
    }

    fn has_free_slot(&self) -> bool {
        self.active_count < self.maximum_active_downloads
    }

    fn activate(&mut self, identifier: &str) -> Option<StartTicket> {
        let pending = self.pending.get_mut(identifier)?;
        if pending.cancel_tx.is_some() {
            return None;
        }
        let (cancel_tx, cancel_rx) = oneshot::channel();
        pending.cancel_tx = Some(cancel_tx);
        self.active_count += 1;

        Some(StartTicket {
            identifier: identifier.to_string(),
            download_id: pending.download_id,
            request: pending.request.clone(),
            cancel_rx,
        })
    }

    /// Activates queued downloads while slots are free.
    pub fn promote(&mut self) -> Vec<StartTicket> {
        let mut tickets = Vec::new();
        while self.has_free_slot() {
            let Some(identifier) = self.queued.pop_front() else {
                break;
            };
            if let Some(ticket) = self.activate(&identifier) {
                tickets.push(ticket);
            }
        }
        tickets
    }

    /// Removes a terminated download and returns its registrations in order.
    pub fn finish(&mut self, identifier: &str, download_id: Uuid) -> Vec<Registration> {
        match self.pending.get(identifier) {
            Some(pending) if pending.download_id == download_id => self
                .pending
                .remove(identifier)
                .map(|pending| pending.registrations)
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Frees the slot held by a terminated download.
    pub fn release_slot(&mut self) {
        self.active_count = self.active_count.saturating_sub(1);
    }

    /// Removes one registration.
    ///
    /// Removing the last registration also drops the download from the pending map so
    /// later requests for the same resource start a fresh fetch.
    pub fn cancel(&mut self, identifier: &str, download_id: Uuid, receipt_id: Uuid) -> CancelOutcome {
        let Some(pending) = self.pending.get_mut(identifier) else {
            return CancelOutcome::NotFound;
        };
        if pending.download_id != download_id {
            return CancelOutcome::NotFound;
        }
        let Some(index) = pending
            .registrations
            .iter()
            .position(|registration| registration.receipt_id == receipt_id)
        else {
            return CancelOutcome::NotFound;
        };

        let registration = pending.registrations.remove(index);
        if !pending.registrations.is_empty() {
            return CancelOutcome::Removed {
                registration,
                cancel_tx: None,
            };
        }

        let cancel_tx = self
            .pending
            .remove(identifier)
            .and_then(|pending| pending.cancel_tx);
        if cancel_tx.is_none() {
            self.queued.retain(|queued| queued != identifier);
        }
        CancelOutcome::Removed {
            registration,
            cancel_tx,
        }
    }
}
