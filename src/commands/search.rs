use anyhow::Result;
use regindex::config::Config;
use regindex::store::{CompanyFilter, SortKey};
use regindex::types::RegistryCode;
use tracing::info;

use super::open_workspace;

/// Arguments of the `search` command
pub struct SearchArgs {
    pub name: Option<String>,
    pub code: Option<RegistryCode>,
    pub location: Option<String>,
    pub status: Option<String>,
    pub person: Option<String>,
    pub limit: usize,
}

impl SearchArgs {
    fn filter(self) -> CompanyFilter {
        let mut filter = CompanyFilter::new().with_limit(self.limit);
        if let Some(name) = self.name {
            filter = filter.with_name(name).ordered_by(SortKey::Name);
        }
        if let Some(code) = self.code {
            filter = filter.with_code(code);
        }
        if let Some(location) = self.location {
            filter = filter.with_location(location);
        }
        if let Some(status) = self.status {
            filter = filter.with_status(status);
        }
        if let Some(person) = self.person {
            filter = filter.with_person(person);
        }
        filter
    }
}

pub async fn search_companies(config: Config, args: SearchArgs) -> Result<()> {
    let workspace = open_workspace(config)?;
    let filter = args.filter();
    info!("Searching: {:?}", filter);

    let mut found = 0usize;
    for record in workspace.store.query(&filter) {
        let record = record?;
        println!(
            "{}\t{}\t{}",
            record.code,
            record.name,
            record.status.as_deref().unwrap_or("-")
        );
        found += 1;
    }

    if found == 0 {
        println!("No matching companies");
    }

    Ok(())
}
