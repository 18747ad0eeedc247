//! Host, bus and serial drives working together.

use commodore_iec::{HOST_ATN_OUT, HOST_CLK_IN, HOST_DATA_IN};
use drive_commodore::{Drive1581, Drive1581Config, DriveError, DriveSync, SerialSystem};
use emu_core::ClockRebase;
use pretty_assertions::assert_eq;

const CIA: u16 = 0x4000;
const PB: u16 = CIA + 0x01;
const DDRB: u16 = CIA + 0x03;
const ICR: u16 = CIA + 0x0D;

fn system_with(devices: &[u8]) -> SerialSystem {
    let mut system = SerialSystem::new();
    for &device in devices {
        let drive = Drive1581::new(Drive1581Config::new(device));
        system
            .attach_drive(drive, DriveSync::new(1_000_000, 2_000_000), 0)
            .expect("device in range");
    }
    system
}

#[test]
fn attach_checks_device_numbers() {
    let mut system = system_with(&[8]);
    let err = system
        .attach_drive(Drive1581::new(Drive1581Config::new(8)), DriveSync::default(), 0)
        .expect_err("device 8 taken");
    assert_eq!(err, DriveError::DeviceInUse(8));

    let err = system
        .attach_drive(Drive1581::new(Drive1581Config::new(12)), DriveSync::default(), 0)
        .expect_err("device 12 out of range");
    assert_eq!(err, DriveError::DeviceOutOfRange(12));

    assert!(system.detach_drive(8).is_some());
    assert!(system.drive(8).is_none());
    assert!(!system.bus().is_attached(0));
}

#[test]
fn host_access_catches_drives_up() {
    let mut system = system_with(&[8, 9]);
    system.host_port_read(1_000);
    assert_eq!(system.drive(8).map(Drive1581::clk), Some(2_000));
    assert_eq!(system.drive(9).map(Drive1581::clk), Some(2_000));

    // An earlier host instant never runs a drive backwards.
    system.host_port_write(500, 0);
    assert_eq!(system.drive(8).map(Drive1581::clk), Some(2_000));

    system.catch_up(1_250);
    assert_eq!(system.drive(8).map(Drive1581::clk), Some(2_500));
}

#[test]
fn atn_handshake() {
    let mut system = system_with(&[8]);
    system.drive_store(8, ICR, 0x90);
    assert_eq!(system.host_port_read(10), HOST_CLK_IN | HOST_DATA_IN, "bus idle");

    system.host_port_write(20, HOST_ATN_OUT);
    assert!(system.drive(8).is_some_and(Drive1581::irq), "ATN reaches FLAG");
    assert_eq!(system.drive_read(8, PB) & 0x80, 0x80, "drive sees ATN low");
    assert_eq!(system.host_port_read(30), HOST_CLK_IN, "unacknowledged ATN holds DATA");

    system.drive_store(8, DDRB, 0x1A);
    system.drive_store(8, PB, 0x10);
    assert_eq!(system.host_port_read(40), HOST_CLK_IN | HOST_DATA_IN, "acknowledged");

    system.drive_store(8, PB, 0x18);
    assert_eq!(system.host_port_read(50), HOST_DATA_IN, "drive holds CLK");
    assert_eq!(system.drive_read(8, PB) & 0x04, 0x04, "drive sees its own CLK");

    system.host_port_write(60, 0);
    assert_eq!(system.host_port_read(70), 0, "ATN released, acknowledge now pulls DATA");
}

#[test]
fn direct_drive_access_reaches_bus() {
    let mut system = system_with(&[8, 9]);
    system.with_drive(8, |drive| {
        drive.store(DDRB, 0x08);
        drive.store(PB, 0x08);
    });
    assert!(!system.bus().clk(), "drive 8 pulls CLK");
    assert_eq!(system.drive_read(9, PB) & 0x04, 0x04, "drive 9 sees CLK low");
    assert_eq!(system.host_port_read(10), HOST_DATA_IN);

    system.with_drive(8, Drive1581::reset);
    assert!(system.bus().clk(), "reset releases CLK");
    assert_eq!(system.with_drive(12, |drive| drive.clk()), None);
}

#[test]
fn atn_reaches_every_drive() {
    let mut system = system_with(&[8, 11]);
    system.drive_store(8, ICR, 0x90);
    system.drive_store(11, ICR, 0x90);
    system.host_port_write(5, HOST_ATN_OUT);
    assert!(system.drive(8).is_some_and(Drive1581::irq));
    assert!(system.drive(11).is_some_and(Drive1581::irq));
}

#[test]
fn drive_outputs_reach_other_drives() {
    let mut system = system_with(&[8, 9]);
    system.drive_store(8, DDRB, 0x1A);
    system.drive_store(8, PB, 0x02);
    assert_eq!(system.drive_read(9, PB) & 0x01, 0x01, "drive 9 sees DATA low");
    system.detach_drive(8);
    assert_eq!(system.drive_read(9, PB) & 0x01, 0x00);
}

#[test]
fn parallel_cable_strobes() {
    let mut system = system_with(&[8]);
    system.connect_cable(Some(8)).expect("device in range");
    assert_eq!(system.connect_cable(Some(3)), Err(DriveError::DeviceOutOfRange(3)));
    system.drive_store(8, ICR, 0x90);

    system.parallel_host_write(10, 0x42, false);
    assert!(!system.drive(8).is_some_and(Drive1581::irq));
    assert_eq!(system.parallel_drive_read(), 0x42);

    system.parallel_host_write(20, 0x43, true);
    assert!(system.drive(8).is_some_and(Drive1581::irq), "strobe pulses FLAG");

    assert!(system.parallel_drive_write(0x99, true));
    assert!(!system.parallel_drive_write(0x98, false));
    assert_eq!(system.parallel_host_read(30), 0x98);
}

#[test]
fn host_rebase_keeps_drive_pace() {
    let mut system = system_with(&[8]);
    system.catch_up(900_000);
    assert_eq!(system.drive(8).map(Drive1581::clk), Some(1_800_000));

    system.rebase(800_000);
    system.catch_up(100_010);
    assert_eq!(system.drive(8).map(Drive1581::clk), Some(1_800_020));
}

#[test]
fn snapshot_round_trip() {
    let mut system = system_with(&[8, 10]);
    system.connect_cable(Some(10)).expect("device in range");
    system.drive_store(10, 0x0123, 0x5A);
    system.drive_store(8, DDRB, 0x1A);
    system.drive_store(8, PB, 0x08);
    system.host_port_write(1_000, HOST_ATN_OUT);
    system.parallel_host_write(1_000, 0x77, false);
    system.catch_up(1_500);
    let bytes = system.write_snapshot(1_600);

    let mut restored = system_with(&[8, 10]);
    restored.read_snapshot(50, &bytes).expect("restore");
    assert_eq!(restored.drive_read(10, 0x0123), 0x5A);
    assert_eq!(restored.bus().host_port(), HOST_ATN_OUT);
    assert_eq!(restored.parallel_drive_read(), 0x77);
    assert_eq!(restored.host_port_read(50), 0, "CLK held by drive 8, DATA by the missing acknowledge");

    let mut mismatched = system_with(&[8]);
    assert!(mismatched.read_snapshot(50, &bytes).is_err());
}
