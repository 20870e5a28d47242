//! `dhcpd.conf` generation
//!
//! One subnet block per pool, holding a static reservation for every
//! subscriber attached to the pool's interface.

use rand::Rng;

use crate::config::DhcpPool;
use crate::model::Subscriber;

/// Resolvers appended after each pool's own DNS servers
pub const FALLBACK_RESOLVERS: [&str; 2] = ["8.8.8.8", "4.2.2.2"];

/// Upper bound (exclusive) of the host-name disambiguator
const DISAMBIGUATOR_RANGE: u32 = 100_000;

/// Render the whole `dhcpd.conf`
pub fn compile_pools<R: Rng + ?Sized>(
    pools: &[DhcpPool],
    subscribers: &[Subscriber],
    rng: &mut R,
) -> String {
    let mut out = String::new();
    for pool in pools {
        out.push_str(&subnet_block(pool, subscribers, rng));
    }
    out
}

fn subnet_block<R: Rng + ?Sized>(pool: &DhcpPool, subscribers: &[Subscriber], rng: &mut R) -> String {
    let mut block = format!(
        "subnet {} netmask {} {{\n  option routers {};\n  option domain-name-servers {}, {};\n  range {};\n",
        pool.subnet,
        pool.netmask,
        pool.routers,
        pool.dns_servers,
        FALLBACK_RESOLVERS.join(", "),
        pool.range
    );

    for subscriber in subscribers.iter().filter(|s| s.bound_to == pool.bound_to) {
        if subscriber.mac.is_empty() || subscriber.framed_ip.is_empty() {
            tracing::debug!(
                "Subscriber {} {} lacks a MAC or address, no reservation in {}",
                subscriber.first_name,
                subscriber.last_name,
                pool.subnet
            );
            continue;
        }
        block.push_str(&format!(
            "  host {} {{\n    hardware ethernet {};\n    fixed-address {};\n  }}\n",
            host_identifier(subscriber, rng),
            subscriber.mac.to_lowercase(),
            subscriber.framed_ip
        ));
    }

    block.push_str("}\n");
    block
}

/// `<first><n><last>` with a random `n` so namesakes do not collide
fn host_identifier<R: Rng + ?Sized>(subscriber: &Subscriber, rng: &mut R) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect()
    };
    format!(
        "{}{}{}",
        clean(&subscriber.first_name),
        rng.gen_range(0..DISAMBIGUATOR_RANGE),
        clean(&subscriber.last_name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Shaping, Status};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn pool(bound_to: &str) -> DhcpPool {
        DhcpPool {
            subnet: "10.10.0.0".to_string(),
            netmask: "255.255.255.0".to_string(),
            routers: "10.10.0.1".to_string(),
            dns_servers: "10.10.0.1".to_string(),
            range: "10.10.0.100 10.10.0.200".to_string(),
            bound_to: bound_to.to_string(),
        }
    }

    #[test]
    fn test_subnet_block_with_reservations() {
        let subs = vec![
            Subscriber::new("AA:BB:CC:DD:EE:FF", "10.10.0.10", "wifi", Shaping::new(10, 5))
                .with_name("Ana Maria", "Cruz"),
            Subscriber::new("aa:bb:cc:dd:ee:01", "10.10.0.11", "wifi", Shaping::new(10, 5))
                .with_status(Status::Inactive),
            Subscriber::new("aa:bb:cc:dd:ee:02", "10.20.0.11", "lan", Shaping::new(10, 5)),
        ];

        let text = compile_pools(&[pool("wifi")], &subs, &mut StdRng::seed_from_u64(7));

        assert!(text.starts_with("subnet 10.10.0.0 netmask 255.255.255.0 {\n"));
        assert!(text.contains("  option domain-name-servers 10.10.0.1, 8.8.8.8, 4.2.2.2;\n"));
        assert!(text.contains("  range 10.10.0.100 10.10.0.200;\n"));
        assert!(text.contains("    hardware ethernet aa:bb:cc:dd:ee:ff;\n"));
        assert!(text.contains("    fixed-address 10.10.0.10;\n"));
        // Reservations do not depend on account status
        assert!(text.contains("    fixed-address 10.10.0.11;\n"));
        assert!(!text.contains("10.20.0.11"));
        assert!(text.contains("  host AnaMaria"));
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn test_seeded_output_is_stable() {
        let subs = vec![
            Subscriber::new("aa:bb:cc:dd:ee:ff", "10.10.0.10", "wifi", Shaping::new(10, 5))
                .with_name("Jo", "Reyes"),
        ];
        let a = compile_pools(&[pool("wifi")], &subs, &mut StdRng::seed_from_u64(1));
        let b = compile_pools(&[pool("wifi")], &subs, &mut StdRng::seed_from_u64(1));
        assert_eq!(a, b);
    }

    #[test]
    fn test_namesakes_get_distinct_hosts() {
        let subs: Vec<_> = (0..2)
            .map(|i| {
                Subscriber::new(
                    format!("aa:bb:cc:dd:ee:0{}", i),
                    format!("10.10.0.{}", 10 + i),
                    "wifi",
                    Shaping::new(10, 5),
                )
                .with_name("Jo", "Reyes")
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(42);
        let first = host_identifier(&subs[0], &mut rng);
        let second = host_identifier(&subs[1], &mut rng);
        assert!(first.starts_with("Jo") && first.ends_with("Reyes"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_empty_pool_list() {
        assert!(compile_pools(&[], &[], &mut StdRng::seed_from_u64(0)).is_empty());
    }
}
