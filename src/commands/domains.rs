//! Domain count listing

use crate::cli::args::OutputFormat;
use crate::cli::output::{print_output, DomainCount, DomainTable};
use crate::error::Result;
use crate::topo::{Domain, PlatformTopo};

fn domain_table(topo: &PlatformTopo) -> DomainTable {
    DomainTable {
        domains: Domain::ALL
            .iter()
            .map(|&domain| DomainCount {
                domain: domain.to_string(),
                count: topo.num_domain(domain),
            })
            .collect(),
    }
}

/// Execute the domains command
pub fn run_domains(topo: &PlatformTopo, format: OutputFormat) -> Result<()> {
    print_output(&domain_table(topo), format)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::cpu_topo;

    #[test]
    fn test_domain_table() {
        let table = domain_table(&cpu_topo(2, 4, 2));
        let count = |name: &str| {
            table
                .domains
                .iter()
                .find(|d| d.domain == name)
                .map(|d| d.count)
        };
        assert_eq!(table.domains.len(), Domain::ALL.len());
        assert_eq!(count("board"), Some(1));
        assert_eq!(count("package"), Some(2));
        assert_eq!(count("core"), Some(8));
        assert_eq!(count("cpu"), Some(16));
        assert_eq!(count("gpu"), Some(0));
    }
}
