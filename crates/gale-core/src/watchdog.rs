use std::{
	sync::atomic::{AtomicI64, Ordering},
	time::Duration,
};

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Cooperative idle timer for a relay session.
///
/// Tasks tied to the session call [`Watchdog::update`] around every socket
/// operation; [`Watchdog::run`] cancels the session token once no update has
/// arrived for the configured interval. The internal timer ticks at a third
/// of the interval, so the wake latency after going idle is bounded by
/// roughly `interval / 3`.
#[derive(Debug)]
pub struct Watchdog {
	started:        Instant,
	// Milliseconds since `started`, 0 until the first update.
	last_update_ms: AtomicI64,
	interval:       Duration,
	token:          CancellationToken,
}

impl Watchdog {
	pub fn new(interval: Duration) -> Self {
		Self {
			started: Instant::now(),
			last_update_ms: AtomicI64::new(0),
			interval,
			token: CancellationToken::new(),
		}
	}

	/// Records activity. Thread-safe, callable from any task of the session.
	pub fn update(&self) {
		// Clamped to 1ms so 0 keeps meaning "never updated".
		let elapsed = (self.started.elapsed().as_millis() as i64).max(1);
		self.last_update_ms.store(elapsed, Ordering::Relaxed);
	}

	/// Disarms the watchdog until the next [`Watchdog::update`].
	pub fn reset(&self) {
		self.last_update_ms.store(0, Ordering::Relaxed);
	}

	/// Cancels the session token, which also makes [`Watchdog::run`] return.
	pub fn stop(&self) {
		self.token.cancel();
	}

	/// The token every I/O operation of the session should be bound to.
	pub fn token(&self) -> CancellationToken {
		self.token.clone()
	}

	/// Watches for idleness. Returns once the idle interval elapsed without
	/// an update (after cancelling the token) or once the token was cancelled
	/// elsewhere.
	pub async fn run(&self) {
		let period_ms = (self.interval.as_millis() as u64).div_ceil(3).max(1);
		let mut tick = tokio::time::interval(Duration::from_millis(period_ms));
		tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				_ = self.token.cancelled() => return,
				_ = tick.tick() => {}
			}
			let last = self.last_update_ms.load(Ordering::Relaxed);
			if last == 0 {
				continue;
			}
			let now = self.started.elapsed().as_millis() as i64;
			if now - last >= self.interval.as_millis() as i64 {
				self.token.cancel();
				return;
			}
		}
	}
}

#[cfg(test)]
mod test {
	use std::time::Duration;

	use super::Watchdog;

	#[tokio::test(start_paused = true)]
	async fn fires_after_idle_interval() {
		let watchdog = Watchdog::new(Duration::from_secs(3));
		watchdog.update();
		watchdog.run().await;
		assert!(watchdog.token().is_cancelled());
	}

	#[tokio::test(start_paused = true)]
	async fn stays_quiet_while_updated() {
		let watchdog = Watchdog::new(Duration::from_secs(3));
		watchdog.update();
		let run = watchdog.run();
		tokio::pin!(run);
		for _ in 0..10 {
			tokio::select! {
				_ = &mut run => panic!("watchdog fired despite updates"),
				_ = tokio::time::sleep(Duration::from_secs(1)) => watchdog.update(),
			}
		}
	}

	#[tokio::test(start_paused = true)]
	async fn unarmed_watchdog_never_fires() {
		let watchdog = Watchdog::new(Duration::from_secs(1));
		let run = watchdog.run();
		tokio::pin!(run);
		tokio::select! {
			_ = &mut run => panic!("watchdog fired without any update"),
			_ = tokio::time::sleep(Duration::from_secs(30)) => {}
		}
	}

	#[tokio::test(start_paused = true)]
	async fn reset_disarms() {
		let watchdog = Watchdog::new(Duration::from_secs(2));
		watchdog.update();
		watchdog.reset();
		let run = watchdog.run();
		tokio::pin!(run);
		tokio::select! {
			_ = &mut run => panic!("watchdog fired after reset"),
			_ = tokio::time::sleep(Duration::from_secs(10)) => {}
		}
	}

	#[tokio::test(start_paused = true)]
	async fn stop_makes_run_return() {
		let watchdog = Watchdog::new(Duration::from_secs(60));
		watchdog.update();
		let run = watchdog.run();
		tokio::pin!(run);
		tokio::select! {
			_ = &mut run => panic!("watchdog fired before stop"),
			_ = tokio::time::sleep(Duration::from_secs(1)) => watchdog.stop(),
		}
		run.await;
		assert!(watchdog.token().is_cancelled());
	}
}
