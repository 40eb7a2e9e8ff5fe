//! Integration tests for TOML configuration loading.
//!
//! Uses figment::Jail for sandboxed file and env var manipulation.

use figment::{
    Figment, Jail,
    providers::{Format, Serialized, Toml},
};
use tally_config::TallyConfig;
use tally_core::{Endpoint, LoadPolicy, SuccessPolicy};

#[test]
fn loads_full_config_from_toml() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
[oauth]
client_id = "app-id"
client_secret = "app-secret"
refresh_token = "rt-shared"
safety_margin_secs = 45

[oauth.tenant_refresh_tokens]
"tenant-b" = "rt-b"

[provider]
api_base_url = "http://localhost:8080/api"
tenant_header = "x-tenant"

[extract]
tenant_ids = ["tenant-a", "tenant-b"]
endpoints = ["Invoices", "Contacts"]
modified_since = "2024-01-01"
concurrency = 2
success_policy = "all"

[retry]
max_rate_limit_retries = 2
calls_per_minute = 0

[destination]
load_type = "incremental_load"
database_path = "./out.duckdb"
"#,
        )?;

        let config: TallyConfig = Figment::from(Serialized::defaults(TallyConfig::default()))
            .merge(Toml::file("config.toml"))
            .extract()?;

        assert_eq!(config.oauth.client_id, "app-id");
        assert_eq!(config.oauth.safety_margin_secs, 45);
        assert_eq!(config.oauth.tenant_refresh_tokens["tenant-b"], "rt-b");
        assert_eq!(config.provider.api_base_url, "http://localhost:8080/api");
        assert_eq!(config.provider.tenant_header, "x-tenant");
        assert_eq!(config.extract.tenant_ids, vec!["tenant-a", "tenant-b"]);
        assert_eq!(
            config.extract.endpoint_selection().expect("selection"),
            vec![Endpoint::Invoices, Endpoint::Contacts]
        );
        assert_eq!(config.extract.concurrency, 2);
        assert_eq!(config.extract.success_policy, SuccessPolicy::All);
        assert_eq!(config.retry.max_rate_limit_retries, 2);
        assert_eq!(config.retry.max_transient_retries, 3);
        assert_eq!(config.retry.calls_per_minute, 0);
        assert_eq!(config.destination.load_type, LoadPolicy::Incremental);
        assert_eq!(config.destination.database_path, "./out.duckdb");
        assert_eq!(config.destination.state_path, "tally-state.json");
        config.validate().expect("valid");
        Ok(())
    });
}

#[test]
fn local_tally_toml_is_picked_up() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "tally.toml",
            r#"
[extract]
endpoints = "Accounts, TaxRates"
"#,
        )?;

        let config = TallyConfig::load(None).expect("config loads");
        assert_eq!(config.extract.endpoints, vec!["Accounts", "TaxRates"]);
        Ok(())
    });
}

#[test]
fn explicit_file_replaces_local_file() {
    Jail::expect_with(|jail| {
        jail.create_file("tally.toml", "[extract]\nconcurrency = 9\n")?;
        jail.create_file("other.toml", "[extract]\nendpoints = [\"Items\"]\n")?;

        let config = TallyConfig::load(Some(std::path::Path::new("other.toml")))
            .expect("config loads");
        assert_eq!(config.extract.endpoints, vec!["Items"]);
        assert_eq!(config.extract.concurrency, 4);
        Ok(())
    });
}

#[test]
fn unknown_load_type_is_rejected() {
    Jail::expect_with(|jail| {
        jail.create_file("tally.toml", "[destination]\nload_type = \"sometimes\"\n")?;
        assert!(TallyConfig::load(None).is_err());
        Ok(())
    });
}

#[test]
fn defaults_when_no_sources_exist() {
    Jail::expect_with(|_jail| {
        let config = TallyConfig::load(None).expect("config loads");
        assert!(!config.oauth.is_configured());
        assert!(config.extract.endpoints.is_empty());
        assert_eq!(config.destination.load_type, LoadPolicy::Full);
        assert!(config.validate().is_err());
        Ok(())
    });
}
