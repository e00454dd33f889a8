//! A gateway and a node running against each other over an in-memory
//! medium. Prints the slot timing table and every event both sides observe.

use std::cell::RefCell;
use std::rc::Rc;

use mari::config::{MariConfig, NodeType};
use mari::event::{Event, EventSink};
use mari::mac::Mac;
use mari::phy::Radio;
use mari::schedule::Schedule;
use mari::time::{Instant, SlotDurations};

const GATEWAY_ID: u64 = 0x0000_0000_0000_0001;
const NODE_ID: u64 = 0x0000_0000_0000_00AA;

struct AiredFrame {
    slot: u64,
    channel: u8,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct Medium {
    slot: u64,
    airing: Vec<AiredFrame>,
}

struct MediumRadio {
    device_id: u64,
    medium: Rc<RefCell<Medium>>,
    channel: u8,
    listening: bool,
    armed_slot: u64,
    cursor: usize,
}

impl MediumRadio {
    fn new(device_id: u64, medium: Rc<RefCell<Medium>>) -> Self {
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

impl Radio for MediumRadio {
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

struct PrintSink {
    name: &'static str,
}

impl EventSink for PrintSink {
    fn on_event(&mut self, event: &Event) {
        match event {
            Event::NewPacket(packet) => {
                print!(
                    "[{}] received data packet of length {}: ",
                    self.name,
                    packet.payload.len()
                );
                for byte in packet.payload.iter() {
                    print!("{byte:02X} ");
                }
                println!();
            }
            Event::NodeJoined { node } => println!("[{}] new node joined: {node:016X}", self.name),
            Event::NodeLeft { node, tag } => {
                println!("[{}] node left ({tag:?}): {node:016X}", self.name)
            }
            Event::Connected { gateway } => {
                println!("[{}] connected to {gateway:016X}", self.name)
            }
            Event::Disconnected { tag } => println!("[{}] disconnected ({tag:?})", self.name),
            Event::Keepalive { node } => println!("[{}] keepalive from {node:016X}", self.name),
            Event::Error { kind } => println!("[{}] error ({kind:?})", self.name),
        }
    }
}

fn print_slot_timing(durations: &SlotDurations) {
    println!("Slot timing:");
    println!("  tx_offset: {}", durations.tx_offset);
    println!("  tx_max: {}", durations.tx_max);
    println!("  rx_guard: {}", durations.rx_guard);
    println!("  rx_offset: {}", durations.rx_offset);
    println!("  rx_max: {}", durations.rx_max);
    println!("  end_guard: {}", durations.end_guard);
    println!("  whole_slot: {}", durations.whole_slot());
}

fn main() {
    env_logger::init();

    let config = MariConfig::default();
    print_slot_timing(&config.slot_durations);
    let whole_slot = config.slot_durations.whole_slot();

    let medium = Rc::new(RefCell::new(Medium::default()));

    let mut gateway = Mac::new(
        MariConfig {
            node_type: NodeType::Gateway,
            fixed_channel: Some(20),
            ..MariConfig::default()
        },
        Schedule::minuscule(),
        MediumRadio::new(GATEWAY_ID, medium.clone()),
        rand::rngs::mock::StepRng::new(0x42, 13),
        PrintSink { name: "gateway" },
    );

    let mut node = Mac::new(
        MariConfig {
            node_type: NodeType::Node,
            fixed_channel: Some(20),
            ..MariConfig::default()
        },
        Schedule::minuscule(),
        MediumRadio::new(NODE_ID, medium.clone()),
        rand::rngs::mock::StepRng::new(0x17, 7),
        PrintSink { name: "node" },
    );

    println!(
        "\n==== gateway {GATEWAY_ID:016X} and node {NODE_ID:016X} on schedule 0x{:02X} ====\n",
        gateway.schedule().id()
    );

    let mut greeted = false;
    for slot in 1..=60u64 {
        medium.borrow_mut().slot += 1;
        let now = Instant::from_us(slot as i64 * whole_slot.as_us());

        gateway.tick(now);
        node.tick(now);
        gateway.end_slot();
        node.end_slot();

        if node.is_connected() && !greeted {
            greeted = true;
            for _ in 0..3 {
                node.send(GATEWAY_ID, b"Hello").unwrap();
            }
        }
    }
}
