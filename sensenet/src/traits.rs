//! Core traits for radio, time, and randomness abstraction.
//!
//! These traits allow the protocol to run over different:
//! - Radio drivers (CC2420-class 802.15.4 radios, LoRa, simulation)
//! - Time sources (hardware timers, simulated time)
//! - Random number generators

use alloc::vec::Vec;
use core::future::Future;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::time::Timestamp;
use crate::types::{Event, Frame, NodeAddr};

/// Queue size for radio events.
pub(crate) const RADIO_QUEUE_SIZE: usize = 8;

/// Queue size for application readings.
pub(crate) const READING_QUEUE_SIZE: usize = 8;

/// Queue size for the event channel.
pub(crate) const EVENT_QUEUE_SIZE: usize = 32;

/// Mutex type used for channels.
pub(crate) type ChannelMutex = CriticalSectionRawMutex;

/// A frame handed up by the radio driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    /// Raw payload bytes (one encoded message).
    pub data: Vec<u8>,
    /// Link-layer source.
    pub from: NodeAddr,
    /// Link-layer destination (a node address or `BROADCAST_ADDR`).
    pub to: NodeAddr,
    /// Received signal strength, if the driver reports it.
    pub rssi: Option<i16>,
}

/// Events raised by the radio driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    Received(Received),
    /// The frame accepted by the last `send` left the radio (or failed to).
    SendDone { success: bool },
}

/// Radio event channel type.
pub type RadioEventChannel = Channel<ChannelMutex, RadioEvent, RADIO_QUEUE_SIZE>;

/// Application readings channel (sensors only).
pub type ReadingChannel = Channel<ChannelMutex, u16, READING_QUEUE_SIZE>;

/// Protocol event channel.
pub type EventChannel = Channel<ChannelMutex, Event, EVENT_QUEUE_SIZE>;

/// Answer of [`Radio::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Frame taken; a `SendDone` event follows.
    Accepted,
    /// Radio cannot take a frame right now. The node keeps it in its backlog.
    Busy,
}

/// Half-duplex radio driver.
///
/// One frame is in flight at a time: after `send` returns
/// [`SendStatus::Accepted`], the node does not call `send` again until the
/// driver reports [`RadioEvent::SendDone`].
///
/// # Example
///
/// ```
/// use sensenet::traits::{Radio, RadioEventChannel, SendStatus};
/// use sensenet::{encode, Frame, Message, NodeAddr};
///
/// /// Radio that can only hold one frame.
/// struct OneSlot {
///     slot: Option<(NodeAddr, Frame)>,
///     events: RadioEventChannel,
/// }
///
/// impl Radio for OneSlot {
///     fn send(&mut self, next_hop: NodeAddr, frame: &Frame) -> SendStatus {
///         if self.slot.is_some() {
///             return SendStatus::Busy;
///         }
///         self.slot = Some((next_hop, *frame));
///         SendStatus::Accepted
///     }
///
///     fn events(&self) -> &RadioEventChannel {
///         &self.events
///     }
/// }
///
/// let mut radio = OneSlot { slot: None, events: RadioEventChannel::new() };
/// let frame = encode(&Message::data(1, 5, 8, 42));
/// assert_eq!(radio.send(2, &frame), SendStatus::Accepted);
/// assert_eq!(radio.send(2, &frame), SendStatus::Busy);
/// ```
pub trait Radio {
    /// Hand one frame to the radio, link-addressed to `next_hop`
    /// (or `BROADCAST_ADDR`).
    fn send(&mut self, next_hop: NodeAddr, frame: &Frame) -> SendStatus;

    /// Channel of received frames and send completions.
    ///
    /// - Radio ISR calls `events().try_send(..)`
    /// - Simulator calls the node's handlers directly
    /// - `Node::run` calls `events().receive().await`
    fn events(&self) -> &RadioEventChannel;

    /// Check if the given RSSI indicates an acceptable link.
    ///
    /// Default implementation accepts everything. Drivers with a meaningful
    /// RSSI should reject values near the noise floor.
    fn is_acceptable_rssi(&self, rssi: Option<i16>) -> bool {
        let _ = rssi;
        true
    }
}

/// Time source trait for real or simulated time.
///
/// # Example (embedded with embassy)
///
/// ```text
/// struct EmbassyClock;
///
/// impl Clock for EmbassyClock {
///     type SleepFuture<'a> = embassy_time::Timer;
///
///     fn now(&self) -> Timestamp {
///         Timestamp::from_millis(embassy_time::Instant::now().as_millis())
///     }
///
///     fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_> {
///         embassy_time::Timer::at(embassy_time::Instant::from_millis(time.as_millis()))
///     }
/// }
/// ```
pub trait Clock {
    /// Future type returned by sleep_until.
    type SleepFuture<'a>: Future<Output = ()>
    where
        Self: 'a;

    /// Get the current timestamp.
    fn now(&self) -> Timestamp;

    /// Sleep until the given timestamp.
    fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_>;
}

/// Random number generator trait. Used for retransmission jitter.
pub trait Random {
    /// Generate a random u64 in the range [min, max).
    fn gen_range(&mut self, min: u64, max: u64) -> u64;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations of traits for unit testing and doc tests.
    //!
    //! Available when running tests or with the `test-support` feature enabled.

    use core::cell::Cell;
    use core::future::{ready, Ready};

    use super::*;

    /// Mock radio recording every accepted frame.
    pub struct MockRadio {
        sent: Vec<(NodeAddr, Frame)>,
        busy: bool,
        min_rssi: Option<i16>,
        events: RadioEventChannel,
    }

    impl Default for MockRadio {
        fn default() -> Self {
            Self {
                sent: Vec::new(),
                busy: false,
                min_rssi: None,
                events: Channel::new(),
            }
        }
    }

    impl MockRadio {
        pub fn new() -> Self {
            Self::default()
        }

        /// Reject frames weaker than `min_rssi`.
        pub fn with_min_rssi(min_rssi: i16) -> Self {
            Self {
                min_rssi: Some(min_rssi),
                ..Self::default()
            }
        }

        /// Make subsequent sends answer `Busy`.
        pub fn set_busy(&mut self, busy: bool) {
            self.busy = busy;
        }

        /// Queue a received frame on the event channel.
        pub fn inject_rx(&self, data: Vec<u8>, from: NodeAddr, to: NodeAddr, rssi: Option<i16>) {
            let _ = self.events.try_send(RadioEvent::Received(Received {
                data,
                from,
                to,
                rssi,
            }));
        }

        /// Take all accepted frames in send order.
        pub fn take_sent(&mut self) -> Vec<(NodeAddr, Frame)> {
            core::mem::take(&mut self.sent)
        }
    }

    impl Radio for MockRadio {
        fn send(&mut self, next_hop: NodeAddr, frame: &Frame) -> SendStatus {
            if self.busy {
                return SendStatus::Busy;
            }
            self.sent.push((next_hop, *frame));
            SendStatus::Accepted
        }

        fn events(&self) -> &RadioEventChannel {
            &self.events
        }

        fn is_acceptable_rssi(&self, rssi: Option<i16>) -> bool {
            match (self.min_rssi, rssi) {
                (Some(min), Some(rssi)) => rssi >= min,
                _ => true,
            }
        }
    }

    /// Mock clock for testing (synchronous, time advances manually).
    pub struct MockClock {
        current: Cell<Timestamp>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                current: Cell::new(Timestamp::ZERO),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn at(time: Timestamp) -> Self {
            Self {
                current: Cell::new(time),
            }
        }

        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }

        pub fn advance(&self, duration: crate::time::Duration) {
            self.current.set(self.current.get() + duration);
        }
    }

    impl Clock for MockClock {
        type SleepFuture<'a> = Ready<()>;

        fn now(&self) -> Timestamp {
            self.current.get()
        }

        fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
            // Completes immediately; tests advance time by hand.
            ready(())
        }
    }

    /// Deterministic LCG for tests.
    pub struct MockRandom {
        state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            if max <= min {
                return min;
            }
            self.state = self
                .state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            min + (self.state >> 33) % (max - min)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_impls::*;
    use super::*;

    #[test]
    fn test_mock_random_in_range() {
        let mut random = MockRandom::with_seed(99);
        for _ in 0..100 {
            let v = random.gen_range(10, 20);
            assert!((10..20).contains(&v));
        }
        assert_eq!(random.gen_range(5, 5), 5);
    }

    #[test]
    fn test_mock_radio_rssi_filter() {
        let radio = MockRadio::with_min_rssi(-90);
        assert!(radio.is_acceptable_rssi(Some(-80)));
        assert!(!radio.is_acceptable_rssi(Some(-95)));
        assert!(radio.is_acceptable_rssi(None));
    }

    #[test]
    fn test_mock_radio_inject() {
        let radio = MockRadio::new();
        radio.inject_rx(alloc::vec![1, 2, 3], 6, 5, Some(-70));
        match radio.events().try_receive() {
            Ok(RadioEvent::Received(rx)) => {
                assert_eq!(rx.from, 6);
                assert_eq!(rx.to, 5);
                assert_eq!(rx.data, alloc::vec![1, 2, 3]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
