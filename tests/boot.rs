use omapboot::mock::{ManualClock, MockOpener, MockTransport};
use omapboot::{
    BootConfig, BootSession, ChannelState, Command, DeviceLocator, ErrorKind, IdRecord, Image,
    RetryPolicy, State,
};
use std::fs;
use std::time::Duration;

const ASIC_ID: [u8; 8] = [0x01, 0x01, 0x05, 0x01, 0x44, 0x30, 0x07, 0x05];
const BANNER: [u8; 4] = [0xdd, 0xcc, 0xbb, 0xaa];

fn upload_bytes(image: &[u8]) -> Vec<u8> {
    let mut bytes = (image.len() as u32).to_le_bytes().to_vec();
    bytes.extend_from_slice(image);
    bytes
}

#[test]
fn full_boot_with_reconnect() {
    let x_loader: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let u_boot: Vec<u8> = (0..30_000u32).map(|i| (i % 13) as u8).collect();

    let rom = MockTransport::new()
        .reply(&ASIC_ID)
        .reopen_after_reenumeration(true);
    let second_stage = MockTransport::new().reply(&BANNER);
    let opener = MockOpener::new()
        .fail_times(5)
        .with_transport(rom.clone())
        .with_transport(second_stage.clone());
    let clock = ManualClock::new();

    let locator = DeviceLocator::with_clock(&opener, &clock)
        .with_policy(RetryPolicy::indefinite(Duration::from_millis(100)));
    let config = BootConfig::default().with_settle_delay(Duration::from_secs(3));
    let mut session = BootSession::connect(locator, config, true).unwrap();
    assert_eq!(session.state(), State::Connected);

    let id = session.id().unwrap();
    assert_eq!(
        id.records,
        vec![IdRecord::Id {
            model: [0x44, 0x30],
            channel: ChannelState::Enabled,
            rom_revision: 0x05,
        }]
    );

    session
        .boot(
            Image::from_bytes(&x_loader).unwrap(),
            Image::from_bytes(&u_boot).unwrap(),
            true,
        )
        .unwrap();

    assert_eq!(
        session.transitions(),
        &[
            State::Idle,
            State::AwaitingDevice,
            State::Connected,
            State::IdQueried,
            State::Stage2Sent,
            State::Stage2Uploading,
            State::SettlingAfterStage2,
            State::Reconnecting,
            State::AwaitingBanner,
            State::Stage3Uploading,
            State::Closed,
        ]
    );

    let mut to_rom = Command::GetId.to_bytes().to_vec();
    to_rom.extend_from_slice(&Command::Boot.to_bytes());
    to_rom.extend(upload_bytes(&x_loader));
    assert_eq!(rom.written(), to_rom);
    assert!(rom.is_closed());

    assert_eq!(second_stage.written(), upload_bytes(&u_boot));
    assert!(second_stage.is_closed());

    // Five polls while waiting for the ROM, then the settle delay
    let mut expected_sleeps = vec![Duration::from_millis(100); 5];
    expected_sleeps.push(Duration::from_secs(3));
    assert_eq!(clock.sleeps(), expected_sleeps);
}

#[test]
fn boot_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let x_loader_path = dir.path().join("MLO");
    let u_boot_path = dir.path().join("u-boot.bin");
    fs::write(&x_loader_path, vec![0x5a; 5000]).unwrap();
    fs::write(&u_boot_path, vec![0xa5; 12345]).unwrap();

    let rom = MockTransport::new().reply(&BANNER);
    let opener = MockOpener::new().with_transport(rom.clone());
    let clock = ManualClock::new();
    let locator = DeviceLocator::with_clock(&opener, &clock);
    let mut session = BootSession::connect(locator, BootConfig::default(), false).unwrap();

    session
        .boot(
            Image::open(&x_loader_path).unwrap(),
            Image::open(&u_boot_path).unwrap(),
            true,
        )
        .unwrap();

    let written = rom.written();
    assert_eq!(written.len(), 4 + (4 + 5000) + (4 + 12345));
    assert_eq!(&written[4..8], &5000u32.to_le_bytes());
    assert_eq!(&written[5008..5012], &12345u32.to_le_bytes());
    assert_eq!(session.state(), State::Closed);
}

#[test]
fn failed_write_aborts_the_boot() {
    let x_loader = vec![0x11; 3 * 4096];

    // Writes: BOOT, header, then three chunks of which the second fails
    let rom = MockTransport::new().fail_write_at(3).reply(&BANNER);
    let opener = MockOpener::new().with_transport(rom.clone());
    let clock = ManualClock::new();
    let locator = DeviceLocator::with_clock(&opener, &clock);
    let mut session = BootSession::connect(locator, BootConfig::default(), false).unwrap();

    let err = session
        .boot(
            Image::from_bytes(&x_loader).unwrap(),
            Image::from_bytes(&[0x22; 16]).unwrap(),
            true,
        )
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(session.state(), State::Failed);
    assert!(rom.is_closed());
    assert_eq!(rom.written().len(), 4 + 4 + 4096);
    // Never got as far as waiting for the second stage
    assert!(clock.sleeps().is_empty());
    assert_eq!(rom.pending_replies(), 1);
}

#[test]
fn missing_image_file() {
    let err = Image::open("/nonexistent/omapboot/MLO").err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn absent_device_without_blocking() {
    let opener = MockOpener::new().fail_times(1);
    let clock = ManualClock::new();
    let locator = DeviceLocator::with_clock(&opener, &clock);

    let err = BootSession::connect(locator, BootConfig::default(), false)
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::DeviceNotFound);
    assert_eq!(opener.attempts(), 1);
}
