//! Local interface listing and campus address discovery.
//!
//! Windows gets the real `ipconfig` output. Elsewhere the adapters are
//! enumerated natively and rendered in the same shape, so the extractor
//! only ever has to understand one text format.

pub const CAMPUS_PREFIX: &str = "172.30.";
const LINK_LOCAL_PREFIX: &str = "169.254";
const IPV4_LABELS: &[&str] = &["IPv4 地址", "IPv4 Address"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    /// Addresses only, used for IP discovery.
    Basic,
    /// Every adapter with hardware and traffic details, used in emails.
    Full,
}

/// Scans an interface dump for the first IPv4 address on the campus subnet.
pub fn extract_campus_ip(dump: &str) -> Option<String> {
    for line in dump.lines() {
        if !IPV4_LABELS.iter().any(|label| line.contains(label)) {
            continue;
        }

        let Some(found) = line.rsplit(':').next().map(strip_annotation) else {
            continue;
        };
        if found.is_empty() {
            continue;
        }

        if found.starts_with(CAMPUS_PREFIX) {
            tracing::info!("Found campus IP address {}", found);
            return Some(found.to_string());
        } else if found.starts_with(LINK_LOCAL_PREFIX) {
            tracing::debug!("Ignoring link-local address {}", found);
        } else {
            tracing::debug!("Ignoring non-campus address {}", found);
        }
    }

    None
}

/// `172.30.5.9(Preferred)` -> `172.30.5.9`
fn strip_annotation(value: &str) -> &str {
    let value = value.trim();
    match value.find('(') {
        Some(open) if value.ends_with(')') => value[..open].trim_end(),
        _ => value,
    }
}

/// Full dump for diagnostics, or an explanation of why there is none.
pub async fn diagnostics() -> String {
    interface_dump(Detail::Full)
        .await
        .unwrap_or_else(|| "Network configuration is unavailable on this machine.".to_string())
}

#[cfg(windows)]
pub async fn interface_dump(detail: Detail) -> Option<String> {
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    let mut command = tokio::process::Command::new("ipconfig");
    if detail == Detail::Full {
        command.arg("/all");
    }
    command.creation_flags(CREATE_NO_WINDOW);

    tracing::debug!("Running ipconfig ({:?})", detail);
    let output = match command.output().await {
        Ok(output) => output,
        Err(why) if why.kind() == std::io::ErrorKind::NotFound => {
            tracing::error!("ipconfig was not found, make sure it is on PATH");
            return None;
        }
        Err(why) => {
            tracing::error!("Failed to run ipconfig: {}", why);
            return None;
        }
    };

    if !output.status.success() {
        tracing::error!("ipconfig exited with {}", output.status);
        return None;
    }

    // The console speaks the OEM code page, which is GBK on Chinese systems.
    let (text, _, had_errors) = encoding_rs::GBK.decode(&output.stdout);
    if had_errors {
        tracing::debug!("ipconfig output contained undecodable bytes, replaced");
    }
    Some(text.into_owned())
}

#[cfg(not(windows))]
pub async fn interface_dump(detail: Detail) -> Option<String> {
    tracing::debug!("Enumerating network interfaces ({:?})", detail);
    let adapters = native::adapters();
    if adapters.is_empty() {
        tracing::error!("No network interfaces found");
        return None;
    }
    Some(native::render(&adapters, detail))
}

#[cfg(not(windows))]
mod native {
    use std::fmt::Write;
    use std::net::IpAddr;

    use super::Detail;

    pub struct Adapter {
        pub name: String,
        pub mac: String,
        pub addresses: Vec<(IpAddr, u8)>,
        pub received: u64,
        pub transmitted: u64,
    }

    pub fn adapters() -> Vec<Adapter> {
        let networks = sysinfo::Networks::new_with_refreshed_list();
        let mut adapters: Vec<Adapter> = networks
            .list()
            .iter()
            .map(|(name, data)| Adapter {
                name: name.clone(),
                mac: data.mac_address().to_string(),
                addresses: data
                    .ip_networks()
                    .iter()
                    .map(|network| (network.addr, network.prefix))
                    .collect(),
                received: data.total_received(),
                transmitted: data.total_transmitted(),
            })
            .collect();
        adapters.sort_by(|a, b| a.name.cmp(&b.name));
        adapters
    }

    fn field(out: &mut String, label: &str, value: impl std::fmt::Display) {
        let _ = writeln!(out, "   {label:.<32} : {value}");
    }

    /// Renders adapters the way `ipconfig` lays them out.
    pub fn render(adapters: &[Adapter], detail: Detail) -> String {
        let mut out = String::new();

        for adapter in adapters {
            let _ = writeln!(out, "Adapter {}:", adapter.name);
            let _ = writeln!(out);
            if detail == Detail::Full {
                field(&mut out, "Physical Address", &adapter.mac);
            }
            for (addr, prefix) in &adapter.addresses {
                match addr {
                    IpAddr::V4(v4) => field(&mut out, "IPv4 Address", v4),
                    IpAddr::V6(v6) => field(&mut out, "IPv6 Address", v6),
                }
                if detail == Detail::Full {
                    field(&mut out, "Prefix Length", prefix);
                }
            }
            if adapter.addresses.is_empty() {
                field(&mut out, "Media State", "No addresses assigned");
            }
            if detail == Detail::Full {
                field(&mut out, "Bytes Received", adapter.received);
                field(&mut out, "Bytes Sent", adapter.transmitted);
            }
            let _ = writeln!(out);
        }

        out
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    const IPCONFIG_EN: &str = "\
Windows IP Configuration


Ethernet adapter Ethernet:

   Connection-specific DNS Suffix  . :
   Link-local IPv6 Address . . . . . : fe80::1c2d:3e4f:5a6b:7c8d%12
   IPv4 Address. . . . . . . . . . . : 172.30.5.9
   Subnet Mask . . . . . . . . . . . : 255.255.0.0
   Default Gateway . . . . . . . . . : 172.30.0.1
";

    #[test]
    fn finds_campus_address() {
        assert_eq!(extract_campus_ip(IPCONFIG_EN).as_deref(), Some("172.30.5.9"));
    }

    #[test]
    fn link_local_only_is_absent() {
        let dump = "   IPv4 Address. . . . . . . . . . . : 169.254.1.1\n";
        assert_eq!(extract_campus_ip(dump), None);
    }

    #[test]
    fn first_campus_match_wins() {
        let dump = "\
Wireless LAN adapter WLAN:
   IPv4 Address. . . . . . . . . . . : 192.168.1.20
Ethernet adapter Ethernet:
   IPv4 Address. . . . . . . . . . . : 172.30.100.7
Ethernet adapter Ethernet 2:
   IPv4 Address. . . . . . . . . . . : 172.30.200.8
";
        assert_eq!(extract_campus_ip(dump).as_deref(), Some("172.30.100.7"));
    }

    #[test]
    fn localized_label_and_preferred_suffix() {
        let dump = "\
以太网适配器 以太网:

   IPv4 地址 . . . . . . . . . . . . : 172.30.44.2(首选)
   子网掩码  . . . . . . . . . . . . : 255.255.0.0
";
        assert_eq!(extract_campus_ip(dump).as_deref(), Some("172.30.44.2"));
    }

    #[test]
    fn ignores_lines_without_ipv4_label() {
        let dump = "   Default Gateway . . . . . . . . . : 172.30.0.1\n";
        assert_eq!(extract_campus_ip(dump), None);
    }
}
