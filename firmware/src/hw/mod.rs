//! Board glue: boot button, configuration flash, power control.

use core::time::Duration;

use csi_node_core::config::store::STORE_SPAN;
use csi_node_core::config::{FlashConfigStore, StoreError};
use csi_node_core::reset::ResetButton;
use embedded_storage::ReadStorage;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Input, InputConfig, Pull};
use esp_hal::peripherals::{FLASH, GPIO0};
use esp_hal::rtc_cntl::Rtc;
use esp_hal::rtc_cntl::sleep::TimerWakeupSource;
use esp_storage::FlashStorage;

/// Configuration store in the last `STORE_SPAN` bytes of flash.
pub type NodeStore = FlashConfigStore<FlashStorage<'static>>;

/// Active-low BOOT button with the internal pull-up enabled.
pub struct BootButton<'d> {
    input: Input<'d>,
}

impl<'d> BootButton<'d> {
    #[must_use]
    pub fn new(pin: GPIO0<'d>) -> Self {
        Self {
            input: Input::new(pin, InputConfig::default().with_pull(Pull::Up)),
        }
    }
}

impl ResetButton for BootButton<'_> {
    fn is_pressed(&mut self) -> bool {
        self.input.is_low()
    }
}

/// Blocking delay used before the executor starts.
pub fn busy_wait(duration: Duration) {
    Delay::new().delay_micros(u32::try_from(duration.as_micros()).unwrap_or(u32::MAX));
}

/// Opens the configuration store at the end of the flash chip.
///
/// # Errors
///
/// Fails if the chip is too small to hold the store.
pub fn open_store(flash: FLASH<'static>) -> Result<NodeStore, StoreError> {
    let flash = FlashStorage::new(flash).multicore_auto_park();
    let capacity = u32::try_from(flash.capacity()).unwrap_or(u32::MAX);
    let base = capacity.saturating_sub(STORE_SPAN);
    FlashConfigStore::new(flash, base)
}

pub fn restart() -> ! {
    esp_hal::system::software_reset()
}

/// Powers down until the timer fires. Execution resumes at the reset vector.
pub fn deep_sleep(rtc: &mut Rtc<'_>, interval: Duration) -> ! {
    let timer = TimerWakeupSource::new(interval);
    rtc.sleep_deep(&[&timer])
}

/// Parks the core for good. Used when the node cannot continue safely.
pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
