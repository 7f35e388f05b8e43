//! Deterministic per-VM network addressing.
//!
//! Each VM owns a /30 block carved from the fleet's base /24:
//!
//! ```text
//! index i:  base + 4i + 1  host side of the tap (gateway)
//!           base + 4i + 2  guest address
//! ```

use crate::options::NetworkOptions;
use fleetlite_shared::{FleetError, FleetResult};
use std::net::Ipv4Addr;

pub const PREFIX_LEN: u8 = 30;

/// Network parameters of one VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeNetwork {
    pub index: usize,
    pub address: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub prefix_len: u8,
    pub hostname: String,
    pub mac: String,
    pub tap: String,
}

/// Addressing for a whole fleet.
#[derive(Debug, Clone)]
pub struct NetworkPlan {
    nodes: Vec<NodeNetwork>,
    dns: Ipv4Addr,
    interface: String,
}

impl NetworkPlan {
    /// Build the plan for `count` VMs, failing if it does not fit the /24.
    pub fn new(options: &NetworkOptions, count: usize) -> FleetResult<Self> {
        let base = u32::from(options.base_address) & 0xffff_ff00;
        let mut nodes = Vec::with_capacity(count);

        for index in 0..count {
            let offset = 4 * index as u32;
            if offset + 3 > 0xff {
                return Err(FleetError::Config(format!(
                    "{} nodes do not fit in {}/24",
                    count,
                    Ipv4Addr::from(base)
                )));
            }
            nodes.push(NodeNetwork {
                index,
                address: Ipv4Addr::from(base + offset + 2),
                gateway: Ipv4Addr::from(base + offset + 1),
                prefix_len: PREFIX_LEN,
                hostname: format!("{}-{}", options.hostname_prefix, index),
                mac: format!("52:54:00:12:34:{:02x}", 0x10 + index),
                tap: format!("{}{}", options.tap_prefix, index),
            });
        }

        Ok(Self {
            nodes,
            dns: options.dns,
            interface: options.guest_interface.clone(),
        })
    }

    pub fn node(&self, index: usize) -> FleetResult<&NodeNetwork> {
        self.nodes
            .get(index)
            .ok_or_else(|| FleetError::Internal(format!("vm {} is not in the network plan", index)))
    }

    pub fn nodes(&self) -> &[NodeNetwork] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dns(&self) -> Ipv4Addr {
        self.dns
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// `/etc/hosts` lines for every node in the fleet.
    pub fn hosts_entries(&self) -> Vec<String> {
        self.nodes
            .iter()
            .map(|node| format!("{} {}", node.address, node.hostname))
            .collect()
    }
}
