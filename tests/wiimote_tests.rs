mod common;

use common::mock_transport::{MockDiscovery, MockWiimote};
use common::test_settings;
use std::sync::Arc;
use std::time::Duration;
use wiimote_driver::{
    CalibrationProfile, ConnectionStatus, DriverError, DriverSettings, MemoryAccessError,
    MemoryRegion, ReportMode, SpeakerConfig, Wiimote,
};

async fn connect(device: &Arc<MockWiimote>) -> Wiimote {
    Wiimote::with_transport(device.as_transport(), test_settings())
        .await
        .unwrap()
}

/// Give the receive loop time to drain injected frames
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_handshake_frames() {
    let device = MockWiimote::new();
    let settings = DriverSettings {
        ready_signal: true,
        ..test_settings()
    };
    let start = tokio::time::Instant::now();
    let wiimote = Wiimote::with_transport(device.as_transport(), settings)
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_millis(1000));
    assert_eq!(
        device.sent_frames(),
        vec![
            vec![0xA2, 0x11, 0x00],
            vec![0xA2, 0x12, 0x00, 0x30],
            vec![0xA2, 0x11, 0xF0],
            vec![0xA2, 0x15, 0x00],
            vec![0xA2, 0x10, 0x01],
            vec![0xA2, 0x10, 0x00],
        ]
    );

    let state = wiimote.connection_state();
    assert_eq!(state.lifecycle, ConnectionStatus::Ready);
    assert!(state.alive);
    assert!(!state.rumble_on);
    assert_eq!(wiimote.status().led_mask, 0b1111);
    wiimote.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_connect_without_device() {
    let discovery = MockDiscovery { device: None };
    let result = Wiimote::connect(&discovery, test_settings()).await;
    assert!(matches!(result, Err(DriverError::DeviceNotFound)));

    let device = MockWiimote::new();
    let discovery = MockDiscovery {
        device: Some(device.clone()),
    };
    let wiimote = Wiimote::connect(&discovery, test_settings()).await.unwrap();
    assert!(wiimote.is_alive());
    wiimote.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_status_query() {
    let device = MockWiimote::new();
    let wiimote = connect(&device).await;

    device.set_status_flags(0x1A);
    let status = wiimote.request_status(true).await.unwrap();
    assert!(!status.low_battery);
    assert!(status.extension_present);
    assert!(!status.speaker_enabled);
    assert!(status.ir_enabled);
    assert_eq!(wiimote.status(), status);
    wiimote.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_status_timeout_leaves_no_pending_request() {
    let device = MockWiimote::new();
    let settings = DriverSettings {
        receive_timeout_ms: 500,
        ..test_settings()
    };
    let wiimote = Wiimote::with_transport(device.as_transport(), settings)
        .await
        .unwrap();

    device.set_answer_status(false);
    let start = tokio::time::Instant::now();
    assert!(matches!(
        wiimote.request_status(true).await,
        Err(DriverError::Timeout)
    ));
    assert!(start.elapsed() >= Duration::from_millis(500));

    device.set_answer_status(true);
    device.set_status_flags(0x01);
    assert!(wiimote.request_status(true).await.unwrap().low_battery);
    wiimote.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_chunked_read() {
    let device = MockWiimote::new();
    let contents: Vec<u8> = (0..32).map(|i| i * 3).collect();
    device.fill_memory(0x0040, &contents);
    let wiimote = connect(&device).await;
    device.clear_sent();

    let data = wiimote
        .read_memory(0x0040, 32, MemoryRegion::Eeprom)
        .await
        .unwrap();
    assert_eq!(data, contents);
    assert_eq!(
        device.sent_frames(),
        vec![vec![0xA2, 0x17, 0x00, 0x00, 0x00, 0x40, 0x00, 0x40]]
    );

    // Partial last chunk
    let data = wiimote
        .read_memory(0x0040, 20, MemoryRegion::Eeprom)
        .await
        .unwrap();
    assert_eq!(data, &contents[..20]);
    wiimote.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_chunked_write() {
    let device = MockWiimote::new();
    let wiimote = connect(&device).await;
    device.clear_sent();

    let data: Vec<u8> = (100..118).collect();
    wiimote
        .write_memory(&data, 0x0020, MemoryRegion::Eeprom)
        .await
        .unwrap();

    let frames = device.sent_with_report(0x16);
    assert_eq!(frames.len(), 2);
    assert_eq!(&frames[0][2..7], &[0x00, 0x00, 0x00, 0x20, 16]);
    assert_eq!(&frames[0][7..], &data[..16]);
    assert_eq!(&frames[1][2..7], &[0x00, 0x00, 0x00, 0x30, 2]);
    assert_eq!(&frames[1][7..9], &data[16..]);
    assert_eq!(&frames[1][9..], &[0u8; 14]);

    assert_eq!(device.memory_at(0x0020, 18), data);
    wiimote.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_read_error_mapping() {
    let device = MockWiimote::new();
    let wiimote = connect(&device).await;

    for (code, expected) in [
        (7, MemoryAccessError::WriteOnlyAddress),
        (8, MemoryAccessError::NonexistentAddress),
        (3, MemoryAccessError::Unknown(3)),
    ] {
        device.set_read_error(Some(code));
        let err = wiimote
            .read_memory(0x1700, 16, MemoryRegion::Eeprom)
            .await
            .unwrap_err();
        assert!(
            matches!(err, DriverError::MemoryAccess(e) if e == expected),
            "code {code}: {err:?}"
        );
    }

    device.set_read_error(None);
    assert_eq!(
        wiimote
            .read_memory(0x1700, 4, MemoryRegion::Eeprom)
            .await
            .unwrap(),
        vec![0; 4]
    );
    wiimote.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_rumble_rides_on_every_frame() {
    let device = MockWiimote::new();
    let wiimote = connect(&device).await;
    device.clear_sent();

    wiimote.set_rumble(true).await.unwrap();
    wiimote.set_report_mode(ReportMode::ButtonsAccel).await.unwrap();
    wiimote.set_continuous(true).await.unwrap();
    wiimote.set_led_mask(0b0101).await.unwrap();
    wiimote.set_rumble(false).await.unwrap();

    assert_eq!(
        device.sent_frames(),
        vec![
            vec![0xA2, 0x10, 0x01],
            vec![0xA2, 0x12, 0x01, 0x31],
            vec![0xA2, 0x12, 0x05, 0x31],
            vec![0xA2, 0x11, 0x51],
            vec![0xA2, 0x15, 0x01],
            vec![0xA2, 0x10, 0x00],
        ]
    );

    let state = wiimote.connection_state();
    assert_eq!(state.report_mode, ReportMode::ButtonsAccel);
    assert!(state.continuous);
    assert_eq!(state.led_mask, 0b0101);
    assert_eq!(wiimote.status().led_mask, 0b0101);
    wiimote.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_led_mask_out_of_range() {
    let device = MockWiimote::new();
    let wiimote = connect(&device).await;
    device.clear_sent();

    assert!(matches!(
        wiimote.set_led_mask(16).await,
        Err(DriverError::Misuse(_))
    ));
    assert!(device.sent_frames().is_empty());
    wiimote.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_data_reports_update_input() {
    let device = MockWiimote::new();
    let wiimote = connect(&device).await;
    wiimote.set_calibration(CalibrationProfile::parse("100 200\n100 200\n100 200").unwrap());

    device.inject(vec![0xA1, 0x31, 0x01, 0x80, 100, 150, 200]);
    settle().await;

    let buttons = wiimote.buttons();
    assert!(buttons.d_left && buttons.home);
    let accel = wiimote.accelerometer().unwrap();
    assert_eq!(accel.raw, [100, 150, 200]);
    assert_eq!(accel.calibrated, [0.0, 0.5, 1.0]);

    device.inject(vec![0xA1, 0x30, 0x00, 0x00]);
    settle().await;
    assert!(!wiimote.buttons().any_pressed());
    assert!(wiimote.accelerometer().is_none());
    wiimote.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_framing_violation_terminates_connection() {
    let device = MockWiimote::new();
    let wiimote = connect(&device).await;

    device.inject(vec![0xA1, 0x30, 0x08, 0x00]);
    settle().await;
    device.inject(vec![0x7E, 0x30, 0x00, 0x00]);
    settle().await;

    assert!(!wiimote.is_alive());
    assert_eq!(wiimote.connection_state().lifecycle, ConnectionStatus::Stopped);
    assert!(device.is_closed());
    // State decoded before the bad frame survives
    assert!(wiimote.buttons().d_up);

    assert!(matches!(
        wiimote.set_rumble(true).await,
        Err(DriverError::Disconnected)
    ));
    assert!(matches!(
        wiimote.stop().await,
        Err(DriverError::ProtocolFraming { marker: 0x7E })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stop_releases_transport() {
    let device = MockWiimote::new();
    let wiimote = connect(&device).await;

    wiimote.stop().await.unwrap();
    assert!(device.is_closed());
    assert_eq!(wiimote.connection_state().lifecycle, ConnectionStatus::Stopped);
    assert!(matches!(
        wiimote.request_status(true).await,
        Err(DriverError::Disconnected)
    ));
    // Stopping twice is harmless
    wiimote.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_speaker() {
    let device = MockWiimote::new();
    let wiimote = connect(&device).await;

    assert!(matches!(
        wiimote.play(vec![0x80; 64], true).await,
        Err(DriverError::Misuse(_))
    ));

    wiimote.init_speaker(SpeakerConfig::default()).await.unwrap();
    assert_eq!(
        device.memory_at(0xA20001, 6),
        SpeakerConfig::default().descriptor().to_vec()
    );
    assert_eq!(device.memory_at(0xA20008, 2), vec![0x01, 0x01]);

    device.clear_sent();
    wiimote.play(vec![0x80; 64], true).await.unwrap();
    let frames = device.sent_with_report(0x18);
    assert_eq!(frames.len(), 4);
    assert_eq!(frames[3][2], 4 << 3);
    assert!(frames.iter().all(|frame| frame.len() == 23));
    wiimote.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_extension_init() {
    let device = MockWiimote::new();
    let wiimote = connect(&device).await;

    assert!(matches!(
        wiimote.init_extension().await,
        Err(DriverError::Misuse(_))
    ));

    let id = [0x00, 0x00, 0xA4, 0x20, 0x00, 0x00];
    device.fill_memory(0xA400FA, &id);
    device.set_status_flags(0x02);
    device.clear_sent();
    assert!(wiimote.request_status(true).await.unwrap().extension_present);
    settle().await;
    // Hot-plug restores the report mode
    assert_eq!(device.sent_with_report(0x12), vec![vec![0xA2, 0x12, 0x00, 0x30]]);

    let block = wiimote.init_extension().await.unwrap();
    assert_eq!(block.len(), 16);
    assert_eq!(&block[..6], &id);
    assert_eq!(device.memory_at(0xA400F0, 1), vec![0x55]);
    assert_eq!(device.memory_at(0xA400FB, 1), vec![0x00]);
    wiimote.stop().await.unwrap();
}
