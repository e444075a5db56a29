use std::sync::atomic::{AtomicU64, Ordering};

/// Byte counters for a single proxy instance.
///
/// Shared by every connection of a server; all operations are thread-safe.
/// Cleared on each server run.
#[derive(Debug, Default)]
pub struct Metrics {
	recv_bytes_total: AtomicU64,
	sent_bytes_total: AtomicU64,
}

impl Metrics {
	pub fn add_recv_bytes(&self, bytes: u64) {
		self.recv_bytes_total.fetch_add(bytes, Ordering::Relaxed);
	}

	pub fn add_sent_bytes(&self, bytes: u64) {
		self.sent_bytes_total.fetch_add(bytes, Ordering::Relaxed);
	}

	pub fn recv_bytes_total(&self) -> u64 {
		self.recv_bytes_total.load(Ordering::Relaxed)
	}

	pub fn sent_bytes_total(&self) -> u64 {
		self.sent_bytes_total.load(Ordering::Relaxed)
	}

	pub fn clear(&self) {
		self.recv_bytes_total.store(0, Ordering::Relaxed);
		self.sent_bytes_total.store(0, Ordering::Relaxed);
	}
}

#[cfg(test)]
mod test {
	use super::Metrics;

	#[test]
	fn counts_and_clears() {
		let metrics = Metrics::default();
		metrics.add_recv_bytes(3);
		metrics.add_recv_bytes(4);
		metrics.add_sent_bytes(10);
		assert_eq!(metrics.recv_bytes_total(), 7);
		assert_eq!(metrics.sent_bytes_total(), 10);
		metrics.clear();
		assert_eq!(metrics.recv_bytes_total(), 0);
		assert_eq!(metrics.sent_bytes_total(), 0);
	}
}
