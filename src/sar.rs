//! Segmentation and reassembly: inbound invokes that arrive in several segments are collected
//!  per psn and assembled once complete, outbound results that are too big for a single PDU are
//!  sliced into segments and sent one group at a time.

use std::collections::BTreeMap;
use anyhow::bail;
use bytes::{Bytes, BytesMut};
use crate::events::RcvInvokeData;

/// Collects the segments of an inbound segmented invoke.
///
/// The first segment is the invoke itself (psn 0), which is kept so that the assembled message
///  can be replayed as a regular invoke. Segments may arrive in any order, duplicates are
///  ignored rather than overwriting what was received before.
pub struct Reassembly {
    first_invoke: RcvInvokeData,
    segments: BTreeMap<u8, Bytes>,
    last_psn: Option<u8>,
}

impl Reassembly {
    pub fn start(first_invoke: RcvInvokeData) -> Reassembly {
        let mut segments = BTreeMap::new();
        segments.insert(0, first_invoke.user_data.clone());

        Reassembly {
            first_invoke,
            segments,
            last_psn: None,
        }
    }

    /// returns `false` if a segment with this psn was received before
    pub fn add_segment(&mut self, psn: u8, user_data: Bytes, is_last: bool) -> bool {
        if is_last {
            self.last_psn = Some(psn);
        }

        if self.segments.contains_key(&psn) {
            return false;
        }
        self.segments.insert(psn, user_data);
        true
    }

    /// psns below `up_to` that were not received yet
    pub fn missing_psns(&self, up_to: u8) -> Vec<u8> {
        (0..up_to)
            .filter(|psn| !self.segments.contains_key(psn))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        match self.last_psn {
            Some(last) => (0..=last).all(|psn| self.segments.contains_key(&psn)),
            None => false,
        }
    }

    /// The stored invoke with the concatenated payload of all segments, or `None` if segments
    ///  are still missing
    pub fn assembled(&self) -> Option<RcvInvokeData> {
        if !self.is_complete() {
            return None;
        }
        let last = self.last_psn?;

        let mut user_data = BytesMut::new();
        for (_, segment) in self.segments.range(0..=last) {
            user_data.extend_from_slice(segment);
        }

        let mut result = self.first_invoke.clone();
        result.user_data = user_data.freeze();
        Some(result)
    }
}

/// The sender side of a segmented result.
pub struct Fragmentation {
    data: Bytes,
    segment_size: usize,
    group_len: u8,
    last_psn: u8,
    confirmed: Option<u8>,
}

impl Fragmentation {
    /// psns are a single octet
    pub const MAX_SEGMENTS: usize = 256;

    pub fn new(data: Bytes, segment_size: usize, group_len: u8) -> anyhow::Result<Fragmentation> {
        if segment_size == 0 || group_len == 0 {
            bail!("segment size and group length must be positive");
        }

        let last_psn = data.len().saturating_sub(1) / segment_size;
        if last_psn >= Self::MAX_SEGMENTS {
            bail!("message of {} bytes needs more than {} segments of {} bytes", data.len(), Self::MAX_SEGMENTS, segment_size);
        }

        Ok(Fragmentation {
            data,
            segment_size,
            group_len,
            last_psn: last_psn as u8,
            confirmed: None,
        })
    }

    pub fn last_psn(&self) -> u8 {
        self.last_psn
    }

    pub fn confirmed(&self) -> Option<u8> {
        self.confirmed
    }

    pub fn segment(&self, psn: u8) -> Bytes {
        let start = (psn as usize * self.segment_size).min(self.data.len());
        let end = (start + self.segment_size).min(self.data.len());
        self.data.slice(start..end)
    }

    pub fn is_transmission_trailer(&self, psn: u8) -> bool {
        psn == self.last_psn
    }

    pub fn is_group_trailer(&self, psn: u8) -> bool {
        !self.is_transmission_trailer(psn) && (psn as usize + 1) % self.group_len as usize == 0
    }

    /// Acks are cumulative, so an ack for an older segment never moves the confirmed position
    ///  backwards. Returns `true` if the ack confirmed segments that were not confirmed before.
    pub fn confirm(&mut self, psn: u8) -> bool {
        if !self.is_progress(psn) {
            return false;
        }
        self.confirmed = Some(psn.min(self.last_psn));
        true
    }

    /// Would an ack for `psn` confirm anything new?
    pub fn is_progress(&self, acked_psn: u8) -> bool {
        let psn = acked_psn.min(self.last_psn);
        self.confirmed.map_or(true, |c| psn > c)
    }

    pub fn is_confirmed(&self, acked_psn: u8) -> bool {
        acked_psn >= self.last_psn
    }

    /// The first segment after the last confirmed one, `None` once everything is confirmed
    pub fn next_unconfirmed(&self) -> Option<u8> {
        match self.confirmed {
            None => Some(0),
            Some(c) if c < self.last_psn => Some(c + 1),
            Some(_) => None,
        }
    }
}
