// ============================================================
// Layer 5 — Compute Device Selection
// ============================================================
// Maps a user's device string onto the devices this machine
// offers, then runs a task on the matching burn backend.
//
// Selector grammar (comma-separated tokens, whitespace ignored):
//
//   "cpu" | "mps" | "cuda:<n>"   exact device name
//   "<n>"                        n-th accelerator → "cuda:<n>"
//   anything else                closest available name by
//                                number of shared characters
//
// Backends:
//   cpu      → NdArray
//   cuda:<n> → Wgpu, n-th discrete GPU
//   mps      → Wgpu, default adapter

use std::collections::HashSet;
use std::fmt;

use anyhow::Result;
use burn::backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, NdArray, Wgpu};
use burn::prelude::Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeDevice {
    Cpu,
    Cuda(usize),
    Mps,
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeDevice::Cpu     => f.write_str("cpu"),
            ComputeDevice::Cuda(i) => write!(f, "cuda:{i}"),
            ComputeDevice::Mps     => f.write_str("mps"),
        }
    }
}

/// Devices present on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInventory {
    pub accelerators: usize,
    pub mps:          bool,
}

impl DeviceInventory {
    pub fn new(accelerators: usize, mps: bool) -> Self {
        Self { accelerators, mps }
    }

    /// cpu, cuda:0.., then mps when present.
    pub fn available(&self) -> Vec<ComputeDevice> {
        let mut devices = vec![ComputeDevice::Cpu];
        devices.extend((0..self.accelerators).map(ComputeDevice::Cuda));
        if self.mps {
            devices.push(ComputeDevice::Mps);
        }
        devices
    }
}

fn shared_chars(a: &str, b: &str) -> usize {
    let a: HashSet<char> = a.chars().collect();
    let b: HashSet<char> = b.chars().collect();
    a.intersection(&b).count()
}

/// Available device with the most characters in common with `token`;
/// ties go to the earliest.
fn closest(token: &str, available: &[ComputeDevice]) -> ComputeDevice {
    let mut best = (ComputeDevice::Cpu, 0usize);
    for (i, device) in available.iter().enumerate() {
        let score = shared_chars(token, &device.to_string());
        if i == 0 || score > best.1 {
            best = (*device, score);
        }
    }
    best.0
}

/// Resolve a selector string to one device per token, in order.
pub fn select_devices(input: &str, inventory: &DeviceInventory) -> Vec<ComputeDevice> {
    let available = inventory.available();
    if let Some(device) = available.iter().find(|d| d.to_string() == input) {
        return vec![*device];
    }

    input
        .split(',')
        .map(str::trim)
        .map(|token| {
            if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
                return match token.parse::<usize>() {
                    Ok(index) if index < inventory.accelerators => ComputeDevice::Cuda(index),
                    _ => closest(&format!("cuda:{token}"), &available),
                };
            }
            available
                .iter()
                .find(|d| d.to_string() == token)
                .copied()
                .unwrap_or_else(|| closest(token, &available))
        })
        .collect()
}

// ─── Backend dispatch ─────────────────────────────────────────────────────────
/// Work that can run on any burn backend.
pub trait DeviceTask {
    type Output;

    fn run<B: Backend>(self, device: B::Device) -> Result<Self::Output>;
}

pub fn run_on<T: DeviceTask>(device: ComputeDevice, task: T) -> Result<T::Output> {
    tracing::info!("Running on {}", device);
    match device {
        ComputeDevice::Cpu     => task.run::<NdArray>(NdArrayDevice::Cpu),
        ComputeDevice::Cuda(i) => task.run::<Wgpu>(WgpuDevice::DiscreteGpu(i)),
        ComputeDevice::Mps     => task.run::<Wgpu>(WgpuDevice::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpus(n: usize) -> DeviceInventory {
        DeviceInventory::new(n, false)
    }

    #[test]
    fn test_exact_names() {
        assert_eq!(select_devices("cpu", &gpus(2)), vec![ComputeDevice::Cpu]);
        assert_eq!(select_devices("cuda:1", &gpus(2)), vec![ComputeDevice::Cuda(1)]);
        assert_eq!(select_devices("mps", &DeviceInventory::new(0, true)), vec![ComputeDevice::Mps]);
    }

    #[test]
    fn test_bare_indices_and_lists() {
        assert_eq!(
            select_devices("0, 1", &gpus(2)),
            vec![ComputeDevice::Cuda(0), ComputeDevice::Cuda(1)]
        );
        // out of range: "cuda:5" shares most with cuda:0 (first of the tie)
        assert_eq!(select_devices("5", &gpus(2)), vec![ComputeDevice::Cuda(0)]);
    }

    #[test]
    fn test_unknown_tokens_fall_back_by_overlap() {
        assert_eq!(select_devices("gpu", &gpus(1)), vec![ComputeDevice::Cpu]);
        assert_eq!(select_devices("cuda", &gpus(1)), vec![ComputeDevice::Cuda(0)]);
        // no accelerators at all: everything lands on cpu
        assert_eq!(select_devices("3", &gpus(0)), vec![ComputeDevice::Cpu]);
    }

    #[test]
    fn test_available_order() {
        let names: Vec<String> = DeviceInventory::new(2, true).available().iter().map(|d| d.to_string()).collect();
        assert_eq!(names, ["cpu", "cuda:0", "cuda:1", "mps"]);
    }
}
