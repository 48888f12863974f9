//! esp-radio configuration and the CSI driver callback.

use alloc::string::String;
use core::cell::Cell;

use csi_node_core::export::{
    CAPTURE_SETTINGS, CsiFrame, CsiSamples, MAX_CSI_SAMPLES, MacAddress, RxControl,
};
use csi_node_core::link::CredentialStrategy;
use csi_node_core::provisioning::{PROVISIONING_AP_PASSWORD, PROVISIONING_AP_SSID};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use esp_radio::wifi::event::{self, EventExt};
use esp_radio::wifi::{
    AccessPointConfig, AuthMethod, ClientConfig, Config as WifiRuntimeConfig, CsiConfig,
    EapClientConfig, ModeConfig, wifi_csi_info_t,
};

const WIFI_RX_QUEUE_SIZE: usize = 8;
const WIFI_TX_QUEUE_SIZE: usize = 4;

static BSSID: Mutex<CriticalSectionRawMutex, Cell<MacAddress>> = Mutex::new(Cell::new([0; 6]));

#[must_use]
pub fn runtime_config() -> WifiRuntimeConfig {
    WifiRuntimeConfig::default()
        .with_rx_queue_size(WIFI_RX_QUEUE_SIZE)
        .with_tx_queue_size(WIFI_TX_QUEUE_SIZE)
}

/// Station configuration for the stored credentials.
#[must_use]
pub fn station_mode(credentials: &CredentialStrategy<'_>) -> ModeConfig {
    match *credentials {
        CredentialStrategy::Open { ssid } => ModeConfig::Client(
            ClientConfig::default()
                .with_ssid(ssid.into())
                .with_auth_method(AuthMethod::None),
        ),
        CredentialStrategy::PreSharedKey { ssid, password } => ModeConfig::Client(
            ClientConfig::default()
                .with_ssid(ssid.into())
                .with_password(password.into())
                .with_auth_method(AuthMethod::Wpa2Personal),
        ),
        CredentialStrategy::Enterprise {
            ssid,
            identity,
            username,
            password,
        } => ModeConfig::EapClient(
            EapClientConfig::default()
                .with_ssid(ssid.into())
                .with_identity(identity.into())
                .with_username(username.into())
                .with_password(password.into())
                .with_auth_method(AuthMethod::Wpa2Enterprise),
        ),
    }
}

/// Provisioning access point. Build-time overrides replace the defaults.
#[must_use]
pub fn access_point_mode() -> ModeConfig {
    let ssid = option_env!("CSI_NODE_PROV_SSID").unwrap_or(PROVISIONING_AP_SSID);
    let password = option_env!("CSI_NODE_PROV_PASS").unwrap_or(PROVISIONING_AP_PASSWORD);
    ModeConfig::AccessPoint(
        AccessPointConfig::default()
            .with_ssid(String::from(ssid))
            .with_password(String::from(password))
            .with_auth_method(AuthMethod::Wpa2Personal),
    )
}

/// Driver capture configuration built from [`CAPTURE_SETTINGS`].
#[must_use]
pub fn csi_config() -> CsiConfig {
    CsiConfig {
        lltf_en: CAPTURE_SETTINGS.lltf,
        htltf_en: CAPTURE_SETTINGS.htltf,
        stbc_htltf2_en: CAPTURE_SETTINGS.stbc_htltf2,
        ltf_merge_en: CAPTURE_SETTINGS.ltf_merge,
        channel_filter_en: CAPTURE_SETTINGS.channel_filter,
        manu_scale: CAPTURE_SETTINGS.manual_scale,
        shift: CAPTURE_SETTINGS.shift,
        dump_ack_en: CAPTURE_SETTINGS.dump_ack,
    }
}

/// Remembers the BSSID of every association for the CSI source filter.
pub fn track_bssid() {
    event::StaConnected::update_handler(|event| {
        let bssid = event.bssid();
        BSSID.lock(|cell| cell.set(bssid));
        defmt::debug!("radio: associated bssid={:02x}", bssid);
    });
}

#[must_use]
pub fn connected_bssid() -> MacAddress {
    BSSID.lock(Cell::get)
}

/// Copies one driver measurement. Bitfields are narrowed to the widths the
/// hardware reports.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::unnecessary_cast
)]
#[must_use]
pub fn frame_from_info(info: &wifi_csi_info_t) -> CsiFrame {
    let rx = &info.rx_ctrl;
    let mut frame = CsiFrame {
        mac: info.mac,
        rx: RxControl {
            rssi: rx.rssi() as i8,
            rate: rx.rate() as u8,
            sig_mode: rx.sig_mode() as u8,
            mcs: rx.mcs() as u8,
            cwb: rx.cwb() as u8,
            smoothing: rx.smoothing() as u8,
            not_sounding: rx.not_sounding() as u8,
            aggregation: rx.aggregation() as u8,
            stbc: rx.stbc() as u8,
            fec_coding: rx.fec_coding() as u8,
            sgi: rx.sgi() as u8,
            noise_floor: rx.noise_floor() as i8,
            ampdu_cnt: rx.ampdu_cnt() as u8,
            channel: rx.channel() as u8,
            secondary_channel: rx.secondary_channel() as u8,
            timestamp: rx.timestamp() as u32,
            ant: rx.ant() as u8,
            sig_len: rx.sig_len() as u16,
            rx_state: rx.rx_state() as u8,
        },
        first_word_invalid: info.first_word_invalid,
        samples: CsiSamples::new(),
    };

    if !info.buf.is_null() {
        let len = usize::from(info.len).min(MAX_CSI_SAMPLES);
        // SAFETY: the driver guarantees `buf` holds `len` bytes for the
        // duration of the callback.
        let raw = unsafe { core::slice::from_raw_parts(info.buf.cast::<i8>().cast_const(), len) };
        let _ = frame.samples.extend_from_slice(raw);
    }
    frame
}
