use super::Translator;
use crate::apisix::upstream::*;
use crate::apisix::{
    ActiveHealthy, ActiveUnhealthy, PassiveHealthy, PassiveUnhealthy, Upstream,
    UpstreamActiveHealthCheck, UpstreamHealthCheck, UpstreamPassiveHealthCheck,
};
use crate::error::TranslateError;
use ingress_api::duration::parse_duration;
use ingress_api::v1 as crd;
use std::time::Duration;

/// Upper bound for success/failure/timeout counters in health checks
const MAX_HEALTH_CHECK_COUNTER: i32 = 254;

/// Shortest probe interval the gateway accepts
const MIN_ACTIVE_INTERVAL: Duration = Duration::from_secs(1);

impl Translator {
    /// Upstream policy without identity or nodes
    pub fn translate_upstream_config(
        &self,
        config: &crd::ApisixUpstreamConfig,
    ) -> Result<Upstream, TranslateError> {
        let mut ups = Upstream::default();
        translate_scheme(&config.scheme, &mut ups)?;
        translate_load_balancer(config.load_balancer.as_ref(), &mut ups)?;
        translate_health_check(config.health_check.as_ref(), &mut ups)?;
        translate_retries_and_timeout(config.retries, config.timeout.as_ref(), &mut ups)?;
        Ok(ups)
    }

    /// Upstream for `port` of the Service `namespace/name`, with nodes from
    /// the endpoint source and policy from the ApisixUpstream of the same
    /// name. Without such a policy the default one is used. The result has no
    /// identity; callers name it.
    pub fn translate_upstream(
        &self,
        namespace: &str,
        name: &str,
        port: i32,
    ) -> Result<Upstream, TranslateError> {
        let nodes = self.resolve_upstream_nodes(namespace, name, port)?;

        let au = match self.apisix_upstreams.get(namespace, name) {
            Ok(au) => au,
            Err(err) if err.is_not_found() => {
                return Ok(Upstream {
                    nodes,
                    ..Default::default()
                })
            }
            Err(err) => return Err(TranslateError::new("ApisixUpstream", err.to_string())),
        };

        let mut ups = self.translate_upstream_config(au.spec.config_for_port(port))?;
        ups.nodes = nodes;
        Ok(ups)
    }
}

fn translate_scheme(scheme: &str, ups: &mut Upstream) -> Result<(), TranslateError> {
    match scheme {
        "" => ups.scheme = SCHEME_HTTP.to_string(),
        SCHEME_HTTP | SCHEME_GRPC => ups.scheme = scheme.to_string(),
        _ => return Err(TranslateError::invalid("scheme")),
    }
    Ok(())
}

fn translate_load_balancer(
    lb: Option<&crd::LoadBalancer>,
    ups: &mut Upstream,
) -> Result<(), TranslateError> {
    let Some(lb) = lb.filter(|lb| !lb.type_.is_empty()) else {
        ups.load_balancer.type_ = LB_ROUND_ROBIN.to_string();
        return Ok(());
    };

    match lb.type_.as_str() {
        LB_ROUND_ROBIN | LB_LEAST_CONN | LB_EWMA => {
            ups.load_balancer.type_ = lb.type_.clone();
        }
        LB_CONSISTENT_HASH => {
            let hash_on = match lb.hash_on.as_str() {
                "" | HASH_ON_VARS => HASH_ON_VARS,
                HASH_ON_HEADER | HASH_ON_COOKIE | HASH_ON_CONSUMER | HASH_ON_VARS_COMBINATION => {
                    lb.hash_on.as_str()
                }
                _ => return Err(TranslateError::invalid("loadbalancer.hashOn")),
            };
            ups.load_balancer.type_ = lb.type_.clone();
            ups.load_balancer.hash_on = Some(hash_on.to_string());
            ups.load_balancer.key = Some(lb.key.clone());
        }
        _ => return Err(TranslateError::invalid("loadbalancer.type")),
    }
    Ok(())
}

fn translate_health_check(
    config: Option<&crd::HealthCheck>,
    ups: &mut Upstream,
) -> Result<(), TranslateError> {
    let Some(config) = config else {
        return Ok(());
    };
    if config.active.is_none() && config.passive.is_none() {
        return Ok(());
    }
    let Some(active) = config.active.as_ref() else {
        return Err(TranslateError::new("healthCheck.active", "not exist"));
    };

    let active = translate_active_health_check(active)?;
    let passive = config
        .passive
        .as_ref()
        .map(translate_passive_health_check)
        .transpose()?;
    ups.health_check = Some(UpstreamHealthCheck { active, passive });
    Ok(())
}

fn translate_active_health_check(
    config: &crd::ActiveHealthCheck,
) -> Result<UpstreamActiveHealthCheck, TranslateError> {
    let mut active = UpstreamActiveHealthCheck {
        type_: health_check_type(&config.type_, "healthCheck.active.type")?,
        host: config.host.clone(),
        http_path: config.http_path.clone(),
        request_headers: config.request_headers.clone(),
        https_verify_certificate: config.strict_tls.unwrap_or(true),
        ..Default::default()
    };

    if let Some(timeout) = config.timeout.as_deref() {
        active.timeout = parse_duration(timeout)
            .map_err(|_| TranslateError::invalid("healthCheck.active.timeout"))?
            .as_secs_f64();
    }

    if !(0..=65535).contains(&config.port) {
        return Err(TranslateError::invalid("healthCheck.active.port"));
    }
    active.port = config.port;

    if config.concurrency < 0 {
        return Err(TranslateError::invalid("healthCheck.active.concurrency"));
    }
    active.concurrency = config.concurrency;

    if let Some(healthy) = config.healthy.as_ref() {
        active.healthy = ActiveHealthy {
            successes: counter(healthy.successes, "healthCheck.active.healthy.successes")?,
            http_statuses: http_codes(&healthy.http_codes, "healthCheck.active.healthy.httpCodes")?,
            interval: interval(&healthy.interval, "healthCheck.active.healthy.interval")?,
        };
    }

    if let Some(unhealthy) = config.unhealthy.as_ref() {
        active.unhealthy = ActiveUnhealthy {
            http_failures: counter(
                unhealthy.http_failures,
                "healthCheck.active.unhealthy.httpFailures",
            )?,
            tcp_failures: counter(
                unhealthy.tcp_failures,
                "healthCheck.active.unhealthy.tcpFailures",
            )?,
            timeouts: counter(unhealthy.timeouts, "healthCheck.active.unhealthy.timeouts")?,
            http_statuses: http_codes(
                &unhealthy.http_codes,
                "healthCheck.active.unhealthy.httpCodes",
            )?,
            interval: interval(&unhealthy.interval, "healthCheck.active.unhealthy.interval")?,
        };
    }

    Ok(active)
}

fn translate_passive_health_check(
    config: &crd::PassiveHealthCheck,
) -> Result<UpstreamPassiveHealthCheck, TranslateError> {
    let mut passive = UpstreamPassiveHealthCheck {
        type_: health_check_type(&config.type_, "healthCheck.passive.type")?,
        ..Default::default()
    };

    if let Some(healthy) = config.healthy.as_ref() {
        passive.healthy = PassiveHealthy {
            successes: counter(healthy.successes, "healthCheck.passive.healthy.successes")?,
            http_statuses: http_codes(&healthy.http_codes, "healthCheck.passive.healthy.httpCodes")?,
        };
    }

    if let Some(unhealthy) = config.unhealthy.as_ref() {
        passive.unhealthy = PassiveUnhealthy {
            http_failures: counter(
                unhealthy.http_failures,
                "healthCheck.passive.unhealthy.httpFailures",
            )?,
            tcp_failures: counter(
                unhealthy.tcp_failures,
                "healthCheck.passive.unhealthy.tcpFailures",
            )?,
            timeouts: counter(unhealthy.timeouts, "healthCheck.passive.unhealthy.timeouts")?,
            http_statuses: http_codes(
                &unhealthy.http_codes,
                "healthCheck.passive.unhealthy.httpCodes",
            )?,
        };
    }

    Ok(passive)
}

fn health_check_type(type_: &str, field: &str) -> Result<String, TranslateError> {
    match type_ {
        "" => Ok(HEALTH_CHECK_HTTP.to_string()),
        HEALTH_CHECK_HTTP | HEALTH_CHECK_HTTPS | HEALTH_CHECK_TCP => Ok(type_.to_string()),
        _ => Err(TranslateError::invalid(field)),
    }
}

fn counter(value: i32, field: &str) -> Result<i32, TranslateError> {
    if (0..=MAX_HEALTH_CHECK_COUNTER).contains(&value) {
        Ok(value)
    } else {
        Err(TranslateError::invalid(field))
    }
}

fn http_codes(codes: &Option<Vec<i32>>, field: &str) -> Result<Vec<i32>, TranslateError> {
    match codes {
        Some(codes) if codes.is_empty() => Err(TranslateError::new(field, "empty")),
        Some(codes) => Ok(codes.clone()),
        None => Ok(Vec::new()),
    }
}

/// Probe interval in whole seconds; absent counts as zero and is rejected
fn interval(value: &Option<String>, field: &str) -> Result<i32, TranslateError> {
    let duration = match value.as_deref() {
        Some(value) => parse_duration(value).map_err(|_| TranslateError::invalid(field))?,
        None => Duration::ZERO,
    };
    if duration < MIN_ACTIVE_INTERVAL {
        return Err(TranslateError::invalid(field));
    }
    i32::try_from(duration.as_secs()).map_err(|_| TranslateError::invalid(field))
}

fn translate_retries_and_timeout(
    retries: Option<i32>,
    timeout: Option<&crd::UpstreamTimeout>,
    ups: &mut Upstream,
) -> Result<(), TranslateError> {
    if let Some(retries) = retries {
        if retries < 0 {
            return Err(TranslateError::invalid("retries"));
        }
        ups.retries = Some(retries);
    }

    let Some(timeout) = timeout else {
        return Ok(());
    };
    // The gateway requires all three once any is set
    ups.timeout = Some(UpstreamTimeout {
        connect: timeout_seconds(&timeout.connect, "timeout.connect")?,
        send: timeout_seconds(&timeout.send, "timeout.send")?,
        read: timeout_seconds(&timeout.read, "timeout.read")?,
    });
    Ok(())
}

fn timeout_seconds(value: &Option<String>, field: &str) -> Result<u64, TranslateError> {
    let Some(value) = value.as_deref() else {
        return Ok(DEFAULT_UPSTREAM_TIMEOUT);
    };
    let duration = parse_duration(value).map_err(|_| TranslateError::invalid(field))?;
    if duration.is_zero() {
        Ok(DEFAULT_UPSTREAM_TIMEOUT)
    } else {
        Ok(duration.as_secs())
    }
}
