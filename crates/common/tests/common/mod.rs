//! Shared test utilities for device integration tests
#![allow(dead_code)]

use common::device::{Device, DeviceConfig, DEFAULT_PIN};
use common::host::{Card, PinSetup};
use common::record::{ExportPolicy, Origin, SecretHeader, SecretType};

pub const PIN0: &[u8] = b"123456";
pub const PUK0: &[u8] = b"12345678";
pub const PIN1: &[u8] = b"654321";
pub const PUK1: &[u8] = b"87654321";
pub const PIN_TRIES: u8 = 5;

/// Log to the test writer when `RUST_LOG` is set
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A device that went through setup, freshly reset
pub fn provisioned_device() -> Device {
    init_tracing();
    let mut device = Device::new(DeviceConfig::default()).unwrap();
    let identity = device.authentikey();
    {
        let mut card = Card::new(&mut device);
        card.open_channel(Some(&identity)).unwrap();
        card.setup(
            DEFAULT_PIN,
            &PinSetup {
                pin_tries: PIN_TRIES,
                puk_tries: 3,
                pin: PIN0,
                puk: PUK0,
            },
            &PinSetup {
                pin_tries: PIN_TRIES,
                puk_tries: 3,
                pin: PIN1,
                puk: PUK1,
            },
            None,
        )
        .unwrap();
    }
    device.reset();
    device
}

/// Open a channel bound to the device identity and verify PIN 0
pub fn connect(device: &mut Device) -> Card<'_> {
    let identity = device.authentikey();
    let mut card = Card::new(device);
    card.open_channel(Some(&identity)).unwrap();
    card.verify_pin(0, PIN0).unwrap();
    card
}

pub fn password_header(label: &[u8], policy: ExportPolicy) -> SecretHeader {
    SecretHeader::new(SecretType::Password, Origin::PlainImport, policy, label).unwrap()
}

/// A payload long enough to span several chunks
pub fn long_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}
