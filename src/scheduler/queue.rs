// std
use std::{cmp::Ordering, collections::BinaryHeap};
// crates.io
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	scheduler::{Priority, QueueStats, QueuedRequest, RequestId, RequestStatus, handle::Reply},
	transport::ApiResponse,
};

#[derive(Debug, PartialEq, Eq)]
struct ReadyKey {
	priority: Priority,
	seq: u64,
	id: RequestId,
}
impl Ord for ReadyKey {
	fn cmp(&self, other: &Self) -> Ordering {
		self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
	}
}
impl PartialOrd for ReadyKey {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

#[derive(Debug)]
pub(crate) struct Entry {
	pub(crate) request: QueuedRequest,
	reply: Option<Reply>,
	seq: u64,
	delayed_until: Option<Instant>,
	pub(crate) cancel_requested: bool,
}

/// Ready heap ordered by (priority, arrival) plus a timer-ordered delay set.
///
/// Heap and delay entries are removed lazily: a key whose request is gone or no longer queued
/// is skipped when popped.
#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
	ready: BinaryHeap<ReadyKey>,
	delayed: BTreeMap<(Instant, u64), RequestId>,
	entries: HashMap<RequestId, Entry>,
	dedup: HashMap<String, RequestId>,
	next_id: u64,
	next_seq: u64,
	pub(crate) closed: bool,
}
impl RequestQueue {
	pub(crate) fn allocate_id(&mut self) -> RequestId {
		self.next_id += 1;

		RequestId(self.next_id)
	}

	/// Keeps freshly allocated identifiers above every recovered one.
	pub(crate) fn observe_id(&mut self, id: RequestId) {
		self.next_id = self.next_id.max(id.0);
	}

	pub(crate) fn contains(&self, id: RequestId) -> bool {
		self.entries.contains_key(&id)
	}

	pub(crate) fn get(&self, id: RequestId) -> Option<&Entry> {
		self.entries.get(&id)
	}

	pub(crate) fn get_mut(&mut self, id: RequestId) -> Option<&mut Entry> {
		self.entries.get_mut(&id)
	}

	pub(crate) fn outstanding(&self) -> usize {
		self.entries.len()
	}

	pub(crate) fn outstanding_key(&self, key: &str) -> Option<RequestId> {
		self.dedup.get(key).copied()
	}

	/// Registers a request without making it dispatchable; see [`Self::activate`].
	pub(crate) fn insert(&mut self, request: QueuedRequest, reply: Option<Reply>) {
		self.next_seq += 1;
		self.dedup.insert(request.dedup_key.clone(), request.id);
		self.entries.insert(
			request.id,
			Entry { request, reply, seq: self.next_seq, delayed_until: None, cancel_requested: false },
		);
	}

	pub(crate) fn activate(&mut self, id: RequestId) {
		if let Some(entry) = self.entries.get(&id)
			&& entry.request.status == RequestStatus::Queued
		{
			self.ready.push(ReadyKey { priority: entry.request.priority, seq: entry.seq, id });
		}
	}

	pub(crate) fn has_ready(&self) -> bool {
		!self.ready.is_empty()
	}

	/// Pops the highest-priority, earliest-submitted dispatchable request.
	pub(crate) fn pop_ready(&mut self) -> Option<RequestId> {
		while let Some(key) = self.ready.pop() {
			if let Some(entry) = self.entries.get(&key.id)
				&& entry.request.status == RequestStatus::Queued
				&& entry.delayed_until.is_none()
				&& entry.seq == key.seq
			{
				return Some(key.id);
			}
		}

		None
	}

	/// Parks a queued request until `until`; it keeps its priority and arrival order.
	pub(crate) fn defer(&mut self, id: RequestId, until: Instant, scheduled_for: OffsetDateTime) {
		if let Some(entry) = self.entries.get_mut(&id) {
			entry.request.status = RequestStatus::Queued;
			entry.request.scheduled_for = Some(scheduled_for);
			entry.delayed_until = Some(until);
			self.delayed.insert((until, entry.seq), id);
		}
	}

	/// Moves every request whose delay has elapsed back to the ready heap.
	pub(crate) fn promote_due(&mut self, now: Instant) {
		while let Some(entry) = self.delayed.first_entry() {
			if entry.key().0 > now {
				break;
			}

			let ((until, seq), id) = entry.remove_entry();

			if let Some(entry) = self.entries.get_mut(&id)
				&& entry.seq == seq
				&& entry.delayed_until == Some(until)
			{
				entry.delayed_until = None;
				entry.request.scheduled_for = None;

				self.ready.push(ReadyKey { priority: entry.request.priority, seq, id });
			}
		}
	}

	pub(crate) fn next_wake(&self) -> Option<Instant> {
		self.delayed.keys().next().map(|(at, _)| *at)
	}

	/// Removes a request, delivers its result, and returns the final snapshot.
	pub(crate) fn finish(
		&mut self,
		id: RequestId,
		status: RequestStatus,
		result: Result<ApiResponse>,
	) -> Option<QueuedRequest> {
		let mut entry = self.entries.remove(&id)?;

		if self.dedup.get(&entry.request.dedup_key) == Some(&id) {
			self.dedup.remove(&entry.request.dedup_key);
		}

		entry.request.status = status;
		entry.request.scheduled_for = None;

		if let Some(reply) = entry.reply.take() {
			let _ = reply.send(result);
		}

		Some(entry.request)
	}

	/// Resolves every outstanding request with `error` and empties the queue.
	pub(crate) fn drain(&mut self, error: impl Fn() -> Error) {
		for (_, mut entry) in self.entries.drain() {
			if let Some(reply) = entry.reply.take() {
				let _ = reply.send(Err(error()));
			}
		}

		self.ready.clear();
		self.delayed.clear();
		self.dedup.clear();
	}

	pub(crate) fn stats(&self) -> QueueStats {
		let mut stats = QueueStats::default();

		for entry in self.entries.values() {
			match (entry.request.status, entry.delayed_until) {
				(RequestStatus::Queued, Some(_)) => stats.delayed += 1,
				(RequestStatus::Queued, None) => stats.queued += 1,
				(RequestStatus::Executing, _) => stats.executing += 1,
				_ => {},
			}
		}

		stats
	}
}
