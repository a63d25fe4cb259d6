//! Merging environment and YAML configuration
//!
//! Environment values form the base; every value present in the YAML file
//! replaces its environment counterpart. Anything still unset falls back to
//! the defaults in [`ClientConfig::default`].

use super::env::EnvConfig;
use super::yaml::YamlConfig;
use super::{ClientConfig, ConnectParams, Endpoints};
use crate::core::service_config::RtviConfig;

/// Build a [`ClientConfig`] from the environment with optional YAML overrides.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let env = EnvConfig::load()?;
    Ok(merge(env, yaml.unwrap_or_default()))
}

pub(super) fn merge(env: EnvConfig, yaml: YamlConfig) -> ClientConfig {
    let defaults = ClientConfig::default();

    let params = yaml.params.unwrap_or_default();
    let endpoints = params.endpoints.unwrap_or_default();
    let session = yaml.session.unwrap_or_default();
    let transport = yaml.transport.unwrap_or_default();

    let config = params
        .config
        .or(env.config)
        .map(RtviConfig::new)
        .unwrap_or(defaults.params.config);

    ClientConfig {
        params: ConnectParams {
            base_url: params.base_url.or(env.base_url),
            endpoints: Endpoints {
                connect: endpoints
                    .connect
                    .or(env.connect_endpoint)
                    .unwrap_or(defaults.params.endpoints.connect),
                action: endpoints
                    .action
                    .or(env.action_endpoint)
                    .unwrap_or(defaults.params.endpoints.action),
            },
            headers: params
                .headers
                .or(env.headers)
                .unwrap_or(defaults.params.headers),
            request_data: params
                .request_data
                .or(env.request_data)
                .unwrap_or(defaults.params.request_data),
            services: params
                .services
                .or(env.services)
                .unwrap_or(defaults.params.services),
            config,
        },
        timeout_ms: session.timeout_ms.or(env.timeout_ms),
        request_timeout_ms: session.request_timeout_ms.or(env.request_timeout_ms),
        enable_mic: session
            .enable_mic
            .or(env.enable_mic)
            .unwrap_or(defaults.enable_mic),
        enable_cam: session
            .enable_cam
            .or(env.enable_cam)
            .unwrap_or(defaults.enable_cam),
        transport_auth: transport.auth.or(env.transport_auth),
        event_channel_capacity: session
            .event_channel_capacity
            .or(env.event_channel_capacity)
            .unwrap_or(defaults.event_channel_capacity),
    }
}
