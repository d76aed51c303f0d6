/// RTP Sample Builder
/// Reassembles complete media frames from RTP packets that arrive out of
/// order, duplicated, or with gaps.
///
/// Packets live in a ring of slots indexed by sequence number. `tail` is the
/// oldest sequence number still pending, `head` is one past the newest one
/// buffered. A frame is the run of packets at `tail` sharing one timestamp; it
/// is emitted once both of its edges are proven:
///
/// - start: the partition head checker recognizes the first payload, or the
///   packet just before it was seen and ended a frame (frame-final marker, or a
///   different timestamp)
/// - end: the last packet is frame-final, or the next packet carries a later
///   timestamp
///
/// A missing packet holds the front back until more than `max_late` packets
/// have arrived past it, or a partition head shows up beyond it.
use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::depacketizer::{Depacketizer, PartitionHeadChecker};
use super::packet::Packet;
use super::seq;
use crate::config::Config;
use crate::error::{Error, Result, MAX_LATE_LIMIT};

/// Smallest ring allocated, whatever the loss window
const MIN_CAPACITY: usize = 16;

/// One reassembled frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub data: Bytes,
    /// Time until the next frame, zero when that frame has not been seen
    pub duration: Duration,
}

/// Statistics about sample builder operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SampleBuilderStats {
    pub packets_received: u64,
    /// Late or duplicate packets ignored on arrival
    pub packets_dropped: u64,
    /// Buffered packets thrown away without making it into a sample
    pub packets_discarded: u64,
    /// Sequence numbers skipped without ever arriving
    pub packets_lost: u64,
    pub samples_emitted: u64,
    pub resyncs: u64,
    pub decode_errors: u64,
    pub current_depth: u16,
}

/// What is known about the packet just before `tail`
#[derive(Debug, Clone, Copy)]
struct Previous {
    timestamp: u32,
    final_fragment: bool,
}

enum FrameScan {
    /// `[tail, end)` holds one whole frame
    Complete { end: u16, next_timestamp: Option<u32> },
    /// The frame is interrupted by this missing sequence number
    Gap(u16),
    /// Ran into `head` before the frame end was proven
    Open,
}

enum Step {
    Emit(Sample, u32),
    Discarded,
    NotReady,
}

pub struct SampleBuilder<D> {
    slots: Vec<Option<Packet>>,
    head: u16,
    tail: u16,
    initialized: bool,
    previous: Option<Previous>,
    max_late: u16,
    sample_rate: u32,
    depacketizer: D,
    head_checker: Option<Box<dyn PartitionHeadChecker + Send>>,
    stats: SampleBuilderStats,
}

impl<D: Depacketizer> SampleBuilder<D> {
    /// Create a builder that waits at most `max_late` packets for a missing one.
    ///
    /// `sample_rate` is the RTP clock rate used to turn timestamp deltas into
    /// durations.
    pub fn new(max_late: u16, depacketizer: D, sample_rate: u32) -> Result<Self> {
        if max_late == 0 || max_late > MAX_LATE_LIMIT {
            return Err(Error::InvalidMaxLate { got: max_late, limit: MAX_LATE_LIMIT });
        }
        if sample_rate == 0 {
            return Err(Error::InvalidSampleRate);
        }

        let capacity = (max_late as usize * 2).next_power_of_two().max(MIN_CAPACITY);
        debug!(
            "Sample builder created: max_late={}, capacity={}, sample_rate={}",
            max_late, capacity, sample_rate
        );

        Ok(Self {
            slots: vec![None; capacity],
            head: 0,
            tail: 0,
            initialized: false,
            previous: None,
            max_late,
            sample_rate,
            depacketizer,
            head_checker: None,
            stats: SampleBuilderStats::default(),
        })
    }

    pub fn from_config(config: &Config, depacketizer: D) -> Result<Self> {
        Self::new(config.max_late, depacketizer, config.sample_rate)
    }

    /// Resynchronize early on payloads this checker recognizes as frame starts
    pub fn with_partition_head_checker<C>(mut self, checker: C) -> Self
    where
        C: PartitionHeadChecker + Send + 'static,
    {
        self.head_checker = Some(Box::new(checker));
        self
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.current_depth == 0
    }

    pub fn stats(&self) -> SampleBuilderStats {
        self.stats
    }

    /// Insert a packet. Never emits; drain with one of the pops afterwards.
    ///
    /// A packet `capacity()` or more ahead of the oldest pending one evicts from
    /// the front, so callers that push in batches without draining lose frames.
    pub fn push(&mut self, packet: Packet) {
        self.stats.packets_received += 1;
        let seq = packet.sequence;

        if !self.initialized {
            self.initialized = true;
            self.tail = seq;
            self.head = seq;
            debug!("Sample builder initialized with first sequence: {}", seq);
        }

        if let Some(behind) = seq::behind_by(seq, self.tail) {
            trace!("Dropping late packet: seq={} ({} behind tail={})", seq, behind, self.tail);
            self.stats.packets_dropped += 1;
            return;
        }

        let offset = seq::distance(self.tail, seq) as usize;
        if offset >= self.capacity() {
            let new_tail = seq.wrapping_sub((self.capacity() - 1) as u16);
            warn!(
                "Buffer overflow, evicting {}..{} to fit seq={}",
                self.tail, new_tail, seq
            );
            self.discard_until(new_tail);
        }

        let index = self.index(seq);
        if let Some(existing) = &self.slots[index] {
            if existing.payload == packet.payload {
                trace!("Dropping duplicate packet: seq={}", seq);
            } else {
                trace!("Duplicate seq={} with a different payload, keeping the first", seq);
            }
            self.stats.packets_dropped += 1;
            return;
        }

        self.slots[index] = Some(packet);
        self.stats.current_depth += 1;
        if seq::distance(self.tail, seq) >= seq::distance(self.tail, self.head) {
            self.head = seq.wrapping_add(1);
        }
        trace!("Buffered packet: seq={}, depth={}", seq, self.stats.current_depth);
    }

    /// Next complete sample, or None if it cannot be determined without waiting
    pub fn pop(&mut self) -> Option<Sample> {
        self.pop_with_timestamp().map(|(sample, _)| sample)
    }

    /// Like [`pop`](Self::pop), also returning the frame's RTP timestamp
    pub fn pop_with_timestamp(&mut self) -> Option<(Sample, u32)> {
        self.next_sample(false)
    }

    /// Next sample, discarding whatever at the front cannot be proven complete
    /// yet. Loop until None to drain the buffer.
    pub fn force_pop(&mut self) -> Option<Sample> {
        self.force_pop_with_timestamp().map(|(sample, _)| sample)
    }

    pub fn force_pop_with_timestamp(&mut self) -> Option<(Sample, u32)> {
        self.next_sample(true)
    }

    fn next_sample(&mut self, force: bool) -> Option<(Sample, u32)> {
        // Every Discarded step moves `tail` forward, so this terminates
        while self.tail != self.head {
            match self.step(force) {
                Step::Emit(sample, timestamp) => return Some((sample, timestamp)),
                Step::Discarded => continue,
                Step::NotReady => return None,
            }
        }
        None
    }

    /// Resolve the front of the buffer by one emission or one discard
    fn step(&mut self, force: bool) -> Step {
        let front = self
            .slot(self.tail)
            .map(|first| (first.timestamp, self.starts_frame(first)));
        let Some((timestamp, starts)) = front else {
            return self.resolve_gap(self.tail, force);
        };

        match self.scan_frame(timestamp) {
            FrameScan::Complete { end, next_timestamp } => {
                if starts {
                    self.emit(end, timestamp, next_timestamp)
                } else {
                    trace!(
                        "Discarding frame ts={} at {}..{}: start not confirmed",
                        timestamp, self.tail, end
                    );
                    self.discard_until(end);
                    Step::Discarded
                }
            }
            FrameScan::Gap(missing) => self.resolve_gap(missing, force),
            FrameScan::Open if force => {
                trace!("Discarding unfinished frame ts={} at {}..{}", timestamp, self.tail, self.head);
                let head = self.head;
                self.discard_until(head);
                Step::Discarded
            }
            FrameScan::Open => Step::NotReady,
        }
    }

    fn starts_frame(&self, packet: &Packet) -> bool {
        if let Some(checker) = &self.head_checker {
            if checker.is_partition_head(&packet.payload) {
                return true;
            }
        }
        match self.previous {
            Some(prev) => prev.final_fragment || prev.timestamp != packet.timestamp,
            None => false,
        }
    }

    fn scan_frame(&self, timestamp: u32) -> FrameScan {
        let mut seq = self.tail;
        loop {
            let Some(packet) = self.slot(seq) else {
                return FrameScan::Gap(seq);
            };
            if packet.timestamp != timestamp {
                return FrameScan::Complete { end: seq, next_timestamp: Some(packet.timestamp) };
            }

            let next = seq.wrapping_add(1);
            if self.depacketizer.is_final_fragment(packet.marker) {
                return FrameScan::Complete {
                    end: next,
                    next_timestamp: self.slot(next).map(|p| p.timestamp),
                };
            }
            if next == self.head {
                return FrameScan::Open;
            }
            seq = next;
        }
    }

    /// Wait for `missing`, or skip past it once waiting is pointless
    fn resolve_gap(&mut self, missing: u16, force: bool) -> Step {
        let newest = self.head.wrapping_sub(1);
        let late = seq::distance(missing, newest);
        let first_present = self.next_present(missing);

        let restart = if force || late > self.max_late {
            Some(first_present.unwrap_or(self.head))
        } else {
            first_present.and_then(|from| self.find_partition_head(from))
        };

        match restart {
            Some(target) => {
                debug!(
                    "Resynchronizing: seq={} missing ({} late), skipping {}..{}",
                    missing, late, self.tail, target
                );
                self.stats.resyncs += 1;
                self.discard_until(target);
                Step::Discarded
            }
            None => Step::NotReady,
        }
    }

    fn emit(&mut self, end: u16, timestamp: u32, next_timestamp: Option<u32>) -> Step {
        let data = match self.decode_span(end) {
            Ok(data) => data,
            Err((seq, e)) => {
                warn!("Discarding frame ts={}: packet seq={} undecodable: {}", timestamp, seq, e);
                self.stats.decode_errors += 1;
                self.discard_until(end);
                return Step::Discarded;
            }
        };

        self.advance_tail(end);
        self.stats.samples_emitted += 1;

        let duration = next_timestamp
            .map(|next| self.duration_between(timestamp, next))
            .unwrap_or_default();
        trace!("Emitting sample ts={}, {} bytes, {:?}", timestamp, data.len(), duration);
        Step::Emit(Sample { data, duration }, timestamp)
    }

    fn decode_span(&self, end: u16) -> std::result::Result<Bytes, (u16, Error)> {
        let mut data = BytesMut::new();
        let mut seq = self.tail;
        while seq != end {
            if let Some(packet) = self.slot(seq) {
                let fragment = self.depacketizer.depacketize(&packet.payload).map_err(|e| (seq, e))?;
                data.extend_from_slice(&fragment);
            }
            seq = seq.wrapping_add(1);
        }
        Ok(data.freeze())
    }

    fn duration_between(&self, from: u32, to: u32) -> Duration {
        let ticks = to.wrapping_sub(from);
        // A timestamp that went backwards says nothing about duration
        if ticks >= 0x8000_0000 {
            return Duration::ZERO;
        }
        Duration::from_nanos(ticks as u64 * 1_000_000_000 / self.sample_rate as u64)
    }

    /// Drop everything in `[tail, target)` and move `tail` there
    fn discard_until(&mut self, target: u16) {
        let (taken, missing) = self.advance_tail(target);
        self.stats.packets_discarded += taken;
        self.stats.packets_lost += missing;
    }

    /// Clear `[tail, target)`, returning (packets taken, sequence numbers missing)
    fn advance_tail(&mut self, target: u16) -> (u64, u64) {
        let span = seq::distance(self.tail, target);
        let buffered = seq::distance(self.tail, self.head);
        let mut taken = 0u64;
        let mut missing = 0u64;

        for i in 0..span.min(buffered) {
            let index = self.index(self.tail.wrapping_add(i));
            match self.slots[index].take() {
                Some(packet) => {
                    taken += 1;
                    self.previous = Some(Previous {
                        timestamp: packet.timestamp,
                        final_fragment: self.depacketizer.is_final_fragment(packet.marker),
                    });
                }
                None => {
                    missing += 1;
                    self.previous = None;
                }
            }
        }

        if span > buffered {
            missing += (span - buffered) as u64;
            self.previous = None;
            self.head = target;
        }
        self.tail = target;
        self.stats.current_depth -= taken as u16;
        (taken, missing)
    }

    fn next_present(&self, after: u16) -> Option<u16> {
        let mut seq = after.wrapping_add(1);
        while seq != self.head {
            if self.slot(seq).is_some() {
                return Some(seq);
            }
            seq = seq.wrapping_add(1);
        }
        None
    }

    fn find_partition_head(&self, from: u16) -> Option<u16> {
        let checker = self.head_checker.as_ref()?;
        let mut seq = from;
        while seq != self.head {
            if let Some(packet) = self.slot(seq) {
                if checker.is_partition_head(&packet.payload) {
                    return Some(seq);
                }
            }
            seq = seq.wrapping_add(1);
        }
        None
    }

    fn slot(&self, seq: u16) -> Option<&Packet> {
        if seq::distance(self.tail, seq) >= seq::distance(self.tail, self.head) {
            return None;
        }
        self.slots[self.index(seq)].as_ref().filter(|p| p.sequence == seq)
    }

    #[inline]
    fn index(&self, seq: u16) -> usize {
        seq as usize & (self.slots.len() - 1)
    }
}

impl<D> fmt::Debug for SampleBuilder<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBuilder")
            .field("capacity", &self.slots.len())
            .field("tail", &self.tail)
            .field("head", &self.head)
            .field("max_late", &self.max_late)
            .field("sample_rate", &self.sample_rate)
            .field("head_checker", &self.head_checker.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::rtp::depacketizer::PassthroughDepacketizer;
    use proptest::prelude::*;

    fn run(packets: &[Packet], with_checker: bool) -> Vec<(Sample, u32)> {
        let mut b = SampleBuilder::new(8, PassthroughDepacketizer, 8000).unwrap();
        if with_checker {
            b = b.with_partition_head_checker(|p: &[u8]| p.first().is_some_and(|byte| byte % 2 == 0));
        }
        let mut out = Vec::new();
        for packet in packets {
            b.push(packet.clone());
            out.extend(std::iter::from_fn(|| b.pop_with_timestamp()));
        }
        out.extend(std::iter::from_fn(|| b.force_pop_with_timestamp()));
        out
    }

    /// Two-packet frames, some packets missing, lightly reordered
    fn stream() -> impl Strategy<Value = Vec<Packet>> {
        (any::<u16>(), proptest::collection::vec((any::<bool>(), any::<bool>()), 1..120)).prop_map(
            |(start, flags)| {
                let mut packets: Vec<Packet> = flags
                    .iter()
                    .enumerate()
                    .filter(|(_, (keep, _))| *keep)
                    .map(|(i, _)| {
                        Packet::new(start.wrapping_add(i as u16), (i / 2) as u32 * 160, vec![i as u8])
                    })
                    .collect();
                for (i, (_, swap)) in flags.iter().enumerate() {
                    if *swap && i + 1 < packets.len() {
                        packets.swap(i, i + 1);
                    }
                }
                packets
            },
        )
    }

    proptest! {
        /// Pushing every packet twice changes nothing
        #[test]
        fn duplicates_are_idempotent(packets in stream(), with_checker in any::<bool>()) {
            let doubled: Vec<Packet> = packets.iter().flat_map(|p| [p.clone(), p.clone()]).collect();
            prop_assert_eq!(run(&packets, with_checker), run(&doubled, with_checker));
        }

        /// Emitted timestamps only move forward and every sample is a whole frame
        #[test]
        fn samples_are_ordered_whole_frames(packets in stream(), with_checker in any::<bool>()) {
            let out = run(&packets, with_checker);
            for pair in out.windows(2) {
                prop_assert!(pair[0].1 < pair[1].1 || pair[1].1.wrapping_sub(pair[0].1) < 0x8000_0000);
                prop_assert_ne!(pair[0].1, pair[1].1);
            }
            for (sample, ts) in &out {
                // frame k is payload bytes 2k and 2k+1
                let k = (ts / 160) as u8;
                prop_assert_eq!(&sample.data[..], &[k.wrapping_mul(2), k.wrapping_mul(2).wrapping_add(1)][..]);
            }
        }
    }
}
