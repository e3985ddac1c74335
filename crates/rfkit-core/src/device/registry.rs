//! Process-wide device instances keyed by interface name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::{
    ButterflyDevice, Device, DeviceError, PcapDevice, RfStormDevice, UbertoothDevice, split_index,
};
use crate::config::DriverConfig;
use crate::lock;

/// Builds the device for `(interface, index)`.
pub type DeviceFactory = Box<dyn Fn(&str, usize, &DriverConfig) -> Arc<dyn Device> + Send + Sync>;

/// Suffix that routes an interface name to the capture file back-end.
const PCAP_SUFFIX: &str = ".pcap";

/// Hands out one initialised instance per interface name.
///
/// Instances are never removed. A closed device is re-initialised in place on
/// the next lookup, and a device that is not up is never returned.
pub struct DeviceRegistry {
    config: DriverConfig,
    factories: Vec<(String, DeviceFactory)>,
    devices: Mutex<HashMap<String, Arc<dyn Device>>>,
}

impl DeviceRegistry {
    /// Registry without any driver.
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            factories: Vec::new(),
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Registry knowing the `ubertooth<N>`, `butterfly<N>` and `rfstorm<N>`
    /// drivers plus `*.pcap` files.
    pub fn with_default_drivers(config: DriverConfig) -> Self {
        let mut registry = Self::new(config);
        registry.register("ubertooth", |iface, index, config| {
            Arc::new(UbertoothDevice::new(iface, index, config.clone()))
        });
        registry.register("butterfly", |iface, index, config| {
            Arc::new(ButterflyDevice::new(iface, index, config.clone()))
        });
        registry.register("rfstorm", |iface, index, config| {
            Arc::new(RfStormDevice::new(iface, index, config.clone()))
        });
        registry
    }

    /// Route interface names `<prefix><N>` to `factory`.
    pub fn register<F>(&mut self, prefix: &str, factory: F)
    where
        F: Fn(&str, usize, &DriverConfig) -> Arc<dyn Device> + Send + Sync + 'static,
    {
        self.factories.push((prefix.to_string(), Box::new(factory)));
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// The ready instance for `interface`.
    ///
    /// `main:subN` names resolve to role proxies of the main device.
    pub fn get(&self, interface: &str) -> Result<Arc<dyn Device>, DeviceError> {
        if let Some((main, _)) = interface.split_once(':') {
            return self
                .get(main)?
                .sub_device(interface)
                .filter(|d| d.is_up())
                .ok_or_else(|| DeviceError::NotFound(interface.to_string()));
        }

        // The map stays locked through init so each device is only initialised
        // once. Subscribers must not call back into the registry from init.
        let mut devices = lock(&self.devices);
        let device = match devices.get(interface) {
            Some(device) if device.is_up() => return Ok(device.clone()),
            Some(device) => {
                debug!(interface, "Re-initialising device");
                device.clone()
            }
            None => {
                let device = self.build(interface)?;
                devices.insert(interface.to_string(), device.clone());
                device
            }
        };

        device.init()?;
        if !device.is_up() {
            return Err(DeviceError::NotFound(interface.to_string()));
        }
        info!(interface, "Device ready");
        Ok(device)
    }

    fn build(&self, interface: &str) -> Result<Arc<dyn Device>, DeviceError> {
        if interface.ends_with(PCAP_SUFFIX) {
            return Ok(Arc::new(PcapDevice::new(interface)));
        }
        let (name, index) = split_index(interface)?;
        self.factories
            .iter()
            .find(|(prefix, _)| prefix == name)
            .map(|(_, factory)| factory(interface, index, &self.config))
            .ok_or_else(|| DeviceError::UnknownInterface(interface.to_string()))
    }

    /// Interfaces instantiated so far.
    pub fn interfaces(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.devices).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn close_all(&self) {
        for device in lock(&self.devices).values() {
            device.close();
        }
    }
}
