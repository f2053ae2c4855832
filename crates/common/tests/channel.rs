//! Integration tests for the host channel as seen from outside the device

mod common;

use ::common::device::{sw, Command, Device, Instruction};
use ::common::host::HostChannel;

use common::{provisioned_device, PIN0};

fn open(device: &mut Device) -> HostChannel {
    let identity = device.authentikey();
    let mut host = HostChannel::new().unwrap();
    let reply = device.process(&host.initiate_command().unwrap());
    assert!(reply.is_ok());
    host.complete(&reply.data, Some(&identity)).unwrap();
    host
}

fn wrapped(host: &mut HostChannel, ins: Instruction, p1: u8, data: &[u8]) -> Vec<u8> {
    host.wrap(&Command::encode(ins, p1, 0, data).unwrap()).unwrap()
}

#[test]
fn test_replayed_message_is_rejected() {
    let mut device = provisioned_device();
    let mut host = open(&mut device);

    let verify = wrapped(&mut host, Instruction::VerifyPin, 0, PIN0);
    assert!(device.process(&verify).is_ok());
    let replay = device.process(&verify);
    assert_eq!(replay.status, sw::CHANNEL_WRONG_IV);

    // the channel survives the replay attempt
    let status = wrapped(&mut host, Instruction::GetStatus, 0, &[]);
    let reply = host.unwrap_reply(device.process(&status)).unwrap();
    assert!(reply.is_ok());
    assert_eq!(reply.data.len(), 12);
}

#[test]
fn test_counters_must_increase() {
    let mut device = provisioned_device();
    let mut host = open(&mut device);

    let earlier = wrapped(&mut host, Instruction::VerifyPin, 0, PIN0);
    let later = wrapped(&mut host, Instruction::VerifyPin, 0, PIN0);
    assert!(device.process(&later).is_ok());
    // valid mac, but its counter is behind the accepted one
    assert_eq!(device.process(&earlier).status, sw::CHANNEL_WRONG_IV);
}

#[test]
fn test_tampered_message_is_rejected() {
    let mut device = provisioned_device();
    let mut host = open(&mut device);

    let mut message = wrapped(&mut host, Instruction::VerifyPin, 0, PIN0);
    let last = message.len() - 1;
    message[last] ^= 0x01;
    assert_eq!(device.process(&message).status, sw::CHANNEL_WRONG_MAC);

    let mut message = wrapped(&mut host, Instruction::VerifyPin, 0, PIN0);
    message[5 + 20] ^= 0x01;
    assert_eq!(device.process(&message).status, sw::CHANNEL_WRONG_MAC);
}

#[test]
fn test_plain_commands_need_the_channel() {
    let mut device = provisioned_device();
    let verify = Command::encode(Instruction::VerifyPin, 0, 0, PIN0).unwrap();
    assert_eq!(device.process(&verify).status, sw::CHANNEL_REQUIRED);

    let status = Command::encode(Instruction::GetStatus, 0, 0, &[]).unwrap();
    assert!(device.process(&status).is_ok());

    let mut host = open(&mut device);
    // a fresh handshake discards the previous session
    let stale = wrapped(&mut host, Instruction::VerifyPin, 0, PIN0);
    let _ = open(&mut device);
    assert_eq!(device.process(&stale).status, sw::CHANNEL_WRONG_MAC);
}

#[test]
fn test_card_reset_closes_the_channel() {
    let mut device = provisioned_device();
    let mut host = open(&mut device);
    device.reset();
    let message = wrapped(&mut host, Instruction::VerifyPin, 0, PIN0);
    assert_eq!(device.process(&message).status, sw::CHANNEL_UNINITIALIZED);
}
