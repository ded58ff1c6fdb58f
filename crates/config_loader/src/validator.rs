//! 配置校验模块
//!
//! 校验规则：
//! - 字段级规则 (validator derive)
//! - broker uri 协议与端口合法
//! - 至少一个可编译的订阅模式（无法编译的模式仅警告并跳过）
//! - abort_after 阈值 >= 1
//! - sink 名称唯一

use std::collections::HashSet;

use contracts::{BridgeBlueprint, ContractError, SinkFailurePolicy};
use tracing::warn;
use validator::Validate;

/// 校验 BridgeBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &BridgeBlueprint) -> Result<(), ContractError> {
    validate_fields(blueprint)?;
    validate_broker(blueprint)?;
    validate_subscriptions(blueprint)?;
    validate_dispatch(blueprint)?;
    validate_sinks(blueprint)?;
    Ok(())
}

/// 字段级规则 (长度、范围)
fn validate_fields(blueprint: &BridgeBlueprint) -> Result<(), ContractError> {
    blueprint
        .validate()
        .map_err(|e| ContractError::config_validation("blueprint", e.to_string()))
}

/// 校验 broker 地址
fn validate_broker(blueprint: &BridgeBlueprint) -> Result<(), ContractError> {
    blueprint.broker.endpoint().map(|_| ())
}

/// 校验订阅模式
fn validate_subscriptions(blueprint: &BridgeBlueprint) -> Result<(), ContractError> {
    let subscriptions = &blueprint.subscriptions;

    // 空白项跳过但给出警告
    for (idx, entry) in subscriptions.watch.iter().enumerate() {
        if entry.trim().is_empty() {
            warn!(index = idx, "skipping empty watch entry");
        }
    }

    let patterns = subscriptions.effective_patterns();
    if patterns.is_empty() {
        return Err(ContractError::config_validation(
            "subscriptions.watch",
            "no subscription patterns configured",
        ));
    }

    // 单个模式无效只影响它自己的订阅
    let invalid = invalid_patterns(blueprint);
    for (pattern, error) in &invalid {
        warn!(pattern = %pattern, error = %error, "pattern will not be subscribed");
    }

    if invalid.len() == patterns.len() {
        return Err(ContractError::config_validation(
            "subscriptions.watch",
            "no subscription pattern compiles",
        ));
    }

    Ok(())
}

/// 无法编译的有效订阅模式及其错误信息
pub fn invalid_patterns(blueprint: &BridgeBlueprint) -> Vec<(String, String)> {
    blueprint
        .subscriptions
        .effective_patterns()
        .into_iter()
        .filter_map(|pattern| {
            topic::compile(&pattern)
                .err()
                .map(|e| (pattern, e.to_string()))
        })
        .collect()
}

/// 校验分发策略
fn validate_dispatch(blueprint: &BridgeBlueprint) -> Result<(), ContractError> {
    if let SinkFailurePolicy::AbortAfter {
        consecutive_failures,
    } = blueprint.dispatch.sink_failure_policy
    {
        if consecutive_failures == 0 {
            return Err(ContractError::config_validation(
                "dispatch.sink_failure_policy.consecutive_failures",
                "consecutive_failures must be >= 1",
            ));
        }
    }
    Ok(())
}

/// 校验 sink 配置
fn validate_sinks(blueprint: &BridgeBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in blueprint.sinks.iter().enumerate() {
        if sink.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks[{}].name", idx),
                "sink name cannot be empty",
            ));
        }
        if !seen.insert(&sink.name) {
            return Err(ContractError::config_validation(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
    }
    Ok(())
}
