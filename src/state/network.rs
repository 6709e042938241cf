//! Network bindings answered by the `network-get` tool.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ScenarioError, ScenarioResult};

/// One address on a bound interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Hostname.
    pub hostname: String,
    /// Address value.
    pub value: String,
    /// CIDR of the subnet.
    pub cidr: String,
}

/// One bound interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindAddress {
    /// MAC address.
    pub mac_address: String,
    /// Interface name.
    pub interface_name: String,
    /// Addresses on this interface.
    pub addresses: Vec<Address>,
}

impl BindAddress {
    /// Render in the shape the hook tool prints.
    #[must_use]
    pub fn hook_tool_output(&self) -> Value {
        json!({
            "mac-address": self.mac_address,
            "interface-name": self.interface_name,
            "interfacename": self.interface_name,
            "addresses": self.addresses,
        })
    }
}

/// Network binding for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Bound interfaces.
    pub bind_addresses: Vec<BindAddress>,
    /// Primary bind address.
    pub bind_address: String,
    /// Egress subnets.
    pub egress_subnets: Vec<String>,
    /// Ingress addresses.
    pub ingress_addresses: Vec<String>,
}

impl Network {
    /// Render in the shape the hook tool prints.
    #[must_use]
    pub fn hook_tool_output(&self) -> Value {
        json!({
            "bind-addresses": self
                .bind_addresses
                .iter()
                .map(BindAddress::hook_tool_output)
                .collect::<Vec<_>>(),
            "bind-address": self.bind_address,
            "egress-subnets": self.egress_subnets,
            "ingress-addresses": self.ingress_addresses,
        })
    }
}

/// A network bound to a named endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Endpoint name.
    pub name: String,
    /// Binding id.
    pub bind_id: u32,
    /// The binding itself.
    pub network: Network,
    /// Whether this is the default binding for unnamed lookups.
    #[serde(default)]
    pub is_default: bool,
}

impl NetworkSpec {
    /// Check the binding invariants.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if there is no bind address, or if a
    /// default binding has empty ingress or egress lists.
    pub fn validate(&self) -> ScenarioResult<()> {
        if self.network.bind_addresses.is_empty() {
            return Err(ScenarioError::config(format!(
                "network {} has no bind addresses",
                self.name
            )));
        }
        if self.is_default
            && (self.network.egress_subnets.is_empty()
                || self.network.ingress_addresses.is_empty())
        {
            return Err(ScenarioError::config(format!(
                "default network {} needs ingress and egress entries",
                self.name
            )));
        }
        Ok(())
    }
}

/// Start building a network with single-binding defaults.
#[must_use]
pub fn network() -> NetworkBuilder {
    NetworkBuilder::default()
}

/// Builder for [`Network`].
///
/// Always produces exactly one bind address carrying one address.
#[derive(Debug, Clone)]
pub struct NetworkBuilder {
    private_address: String,
    mac_address: String,
    hostname: String,
    cidr: String,
    interface_name: String,
    egress_subnets: Vec<String>,
    ingress_addresses: Vec<String>,
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self {
            private_address: "1.1.1.1".to_string(),
            mac_address: String::new(),
            hostname: String::new(),
            cidr: String::new(),
            interface_name: String::new(),
            egress_subnets: vec!["1.1.1.2/32".to_string()],
            ingress_addresses: vec!["1.1.1.2".to_string()],
        }
    }
}

impl NetworkBuilder {
    /// Set the private address.
    #[must_use]
    pub fn private_address(mut self, address: impl Into<String>) -> Self {
        self.private_address = address.into();
        self
    }

    /// Set the MAC address.
    #[must_use]
    pub fn mac_address(mut self, mac: impl Into<String>) -> Self {
        self.mac_address = mac.into();
        self
    }

    /// Set the hostname.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the CIDR.
    #[must_use]
    pub fn cidr(mut self, cidr: impl Into<String>) -> Self {
        self.cidr = cidr.into();
        self
    }

    /// Set the interface name.
    #[must_use]
    pub fn interface_name(mut self, name: impl Into<String>) -> Self {
        self.interface_name = name.into();
        self
    }

    /// Set the egress subnets.
    #[must_use]
    pub fn egress_subnets<S: Into<String>>(mut self, subnets: impl IntoIterator<Item = S>) -> Self {
        self.egress_subnets = subnets.into_iter().map(Into::into).collect();
        self
    }

    /// Set the ingress addresses.
    #[must_use]
    pub fn ingress_addresses<S: Into<String>>(
        mut self,
        addresses: impl IntoIterator<Item = S>,
    ) -> Self {
        self.ingress_addresses = addresses.into_iter().map(Into::into).collect();
        self
    }

    /// Build the network.
    #[must_use]
    pub fn build(self) -> Network {
        Network {
            bind_addresses: vec![BindAddress {
                mac_address: self.mac_address,
                interface_name: self.interface_name,
                addresses: vec![Address {
                    hostname: self.hostname,
                    value: self.private_address.clone(),
                    cidr: self.cidr,
                }],
            }],
            bind_address: self.private_address,
            egress_subnets: self.egress_subnets,
            ingress_addresses: self.ingress_addresses,
        }
    }
}
