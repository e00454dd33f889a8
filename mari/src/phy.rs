//! Access to the radio peripheral.
//!
//! The slot runtime drives the radio through the [`Radio`] trait: one action
//! per slot, armed at the slot's sub-timing and torn down before the next.
//! Frames received while the receiver is armed are buffered by the driver
//! (typically from its interrupt handler) and drained with
//! [`Radio::poll_received`]; the borrow handed to the closure must not
//! outlive the call, so consumers copy what they need to keep.

/// Contract of the radio PHY driver.
pub trait Radio {
    /// The 64-bit device id burned into the radio.
    fn device_id(&self) -> u64;

    /// Switch to the given physical channel.
    fn set_channel(&mut self, channel: u8);

    /// Start transmitting the given frame on the current channel.
    fn transmit(&mut self, frame: &[u8]);

    /// Arm the receiver on the current channel.
    fn receive(&mut self);

    /// Idle the radio in a low-power state, cancelling any armed action.
    fn disable(&mut self);

    /// Drain the frame received since the receiver was armed, if any,
    /// together with its RSSI. Returns whether a frame was delivered.
    fn poll_received<F: FnOnce(&[u8], i8)>(&mut self, f: F) -> bool;
}

#[cfg(test)]
pub mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    /// A frame in flight on the simulated medium, stamped with the
    /// simulation slot it was aired in.
    #[derive(Debug, Clone)]
    pub struct AiredFrame {
        pub slot: u64,
        pub channel: u8,
        pub bytes: std::vec::Vec<u8>,
    }

    /// A broadcast medium shared by every [`SimRadio`] attached to it. A
    /// radio hears a frame when its receiver was armed in the slot the frame
    /// was aired in, on the same channel. The air log is kept for the whole
    /// run so tests can inspect what actually went over the air.
    #[derive(Default)]
    pub struct Medium {
        pub slot: u64,
        pub airing: std::vec::Vec<AiredFrame>,
    }

    impl Medium {
        pub fn shared() -> Rc<RefCell<Medium>> {
            Rc::new(RefCell::new(Medium::default()))
        }

        /// Start the next simulated slot.
        pub fn advance_slot(&mut self) {
            self.slot += 1;
        }
    }

    pub struct SimRadio {
        device_id: u64,
        medium: Rc<RefCell<Medium>>,
        channel: u8,
        listening: bool,
        armed_slot: u64,
        cursor: usize,
    }

    impl SimRadio {
        pub fn new(device_id: u64, medium: Rc<RefCell<Medium>>) -> Self {
            Self {
                device_id,
                medium,
                channel: 0,
                listening: false,
                armed_slot: 0,
                cursor: 0,
            }
        }
    }

    impl Radio for SimRadio {
        fn device_id(&self) -> u64 {
            self.device_id
        }

        fn set_channel(&mut self, channel: u8) {
            self.channel = channel;
        }

        fn transmit(&mut self, frame: &[u8]) {
            self.listening = false;
            let mut medium = self.medium.borrow_mut();
            let slot = medium.slot;
            medium.airing.push(AiredFrame {
                slot,
                channel: self.channel,
                bytes: frame.to_vec(),
            });
        }

        fn receive(&mut self) {
            self.listening = true;
            self.armed_slot = self.medium.borrow().slot;
        }

        fn disable(&mut self) {
            self.listening = false;
        }

        fn poll_received<F: FnOnce(&[u8], i8)>(&mut self, f: F) -> bool {
            if !self.listening {
                return false;
            }
            let medium = self.medium.borrow();
            while self.cursor < medium.airing.len() {
                let frame = &medium.airing[self.cursor];
                self.cursor += 1;
                if frame.slot == self.armed_slot && frame.channel == self.channel {
                    f(&frame.bytes, -45);
                    return true;
                }
            }
            false
        }
    }
}
