// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./strategy_test.rs"]
mod tests;

use crate::config::StoreConfig;
use crate::{NotificationSink, STORAGE_FULL_NOTIFICATION, ServiceControl};
use std::sync::Arc;
use std::time::Duration;

//
// StoreProbe
//

/// The slice of the persistent storage manager that overflow strategies operate on.
///
/// `retry_pending_insert` re-executes the insert that hit the size limit; it reports true when
/// there is nothing pending or the retry went through, false when the store is still full.
#[cfg_attr(test, mockall::automock)]
pub trait StoreProbe {
  fn retry_pending_insert(&self) -> bool;
  fn record_count(&self) -> i64;
  fn delete_oldest(&self, count: i64, lowest_priority_first: bool) -> i64;
}

//
// OverflowStrategy
//

/// One recovery action taken when the store is full. Returning true resolves the condition and
/// stops the chain; returning false passes control to the next strategy.
pub trait OverflowStrategy: Send + Sync {
  fn process(&self, probe: &dyn StoreProbe) -> bool;
}

//
// OverflowChain
//

// An ordered list of strategies executed with early exit, in place of successor references on
// the strategies themselves.
pub struct OverflowChain {
  strategies: Vec<Box<dyn OverflowStrategy>>,
}

impl OverflowChain {
  #[must_use]
  pub fn new(strategies: Vec<Box<dyn OverflowStrategy>>) -> Self {
    Self { strategies }
  }

  /// Runs strategies in order until one reports success. Returns false when the chain is
  /// exhausted without recovery.
  pub fn run(&self, probe: &dyn StoreProbe) -> bool {
    for (index, strategy) in self.strategies.iter().enumerate() {
      if strategy.process(probe) {
        log::debug!("store overflow resolved by strategy {index}");
        return true;
      }
    }
    false
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.strategies.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.strategies.is_empty()
  }
}

//
// WaitStrategy
//

/// Blocks the worker for a fixed duration to let in-flight work settle, then reports whatever
/// the retry probe reports.
pub struct WaitStrategy {
  wait: Duration,
}

impl WaitStrategy {
  #[must_use]
  pub const fn new(wait: Duration) -> Self {
    Self { wait }
  }
}

impl OverflowStrategy for WaitStrategy {
  fn process(&self, probe: &dyn StoreProbe) -> bool {
    std::thread::sleep(self.wait);
    probe.retry_pending_insert()
  }
}

//
// DeleteSamplesStrategy
//

/// Evicts up to `count` records, least important first when `lowest_priority_first` is set and
/// oldest first otherwise, then re-probes.
pub struct DeleteSamplesStrategy {
  count: i64,
  lowest_priority_first: bool,
}

impl DeleteSamplesStrategy {
  #[must_use]
  pub const fn new(count: i64, lowest_priority_first: bool) -> Self {
    Self {
      count,
      lowest_priority_first,
    }
  }
}

impl OverflowStrategy for DeleteSamplesStrategy {
  fn process(&self, probe: &dyn StoreProbe) -> bool {
    let count = probe.record_count().min(self.count).max(0);
    let deleted = probe.delete_oldest(count, self.lowest_priority_first);
    if deleted > 0 {
      log::info!("deleted {deleted} stored samples to reclaim space");
    }
    probe.retry_pending_insert()
  }
}

//
// NotificationStrategy
//

/// Surfaces the condition to the user. A side effecting, non resolving link; it always passes
/// through to its successor.
pub struct NotificationStrategy {
  sink: Arc<dyn NotificationSink>,
}

impl NotificationStrategy {
  #[must_use]
  pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
    Self { sink }
  }
}

impl OverflowStrategy for NotificationStrategy {
  fn process(&self, _probe: &dyn StoreProbe) -> bool {
    self.sink.notify(
      STORAGE_FULL_NOTIFICATION,
      "maximum database size exceeded",
    );
    false
  }
}

//
// StopServiceStrategy
//

/// Terminal strategy. Skips the stop when the retry probe reports that samples are flowing
/// again, so in-flight work is not killed; otherwise stops the hosting service. Structurally it
/// always reports failure.
pub struct StopServiceStrategy {
  control: Arc<dyn ServiceControl>,
}

impl StopServiceStrategy {
  #[must_use]
  pub fn new(control: Arc<dyn ServiceControl>) -> Self {
    Self { control }
  }
}

impl OverflowStrategy for StopServiceStrategy {
  fn process(&self, probe: &dyn StoreProbe) -> bool {
    if probe.retry_pending_insert() {
      return false;
    }
    if !self.control.stop_service() {
      log::error!("failed to stop the hosting service");
    }
    false
  }
}

//
// OverflowPolicy
//

/// Which recovery chain to run when the store is full.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
  /// Wait, evict stored samples, then notify the user.
  WaitDeleteNotify,
  /// Wait, notify the user, then stop the hosting service.
  WaitNotifyStopService,
}

/// Builds the configured chain, parameterized from the store configuration.
#[must_use]
pub fn build_chain(
  config: &StoreConfig,
  sink: Arc<dyn NotificationSink>,
  control: Arc<dyn ServiceControl>,
) -> OverflowChain {
  let wait = Box::new(WaitStrategy::new(config.overflow_wait));
  match config.overflow_policy {
    OverflowPolicy::WaitDeleteNotify => OverflowChain::new(vec![
      wait,
      Box::new(DeleteSamplesStrategy::new(
        config.deletion_record_count,
        config.delete_lowest_priority_first,
      )),
      Box::new(NotificationStrategy::new(sink)),
    ]),
    OverflowPolicy::WaitNotifyStopService => OverflowChain::new(vec![
      wait,
      Box::new(NotificationStrategy::new(sink)),
      Box::new(StopServiceStrategy::new(control)),
    ]),
  }
}
