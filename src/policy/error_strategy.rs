//! Error Strategy
//!
//! Converts a module failure at the boundary according to the configured
//! [`ErrorStrategy`]:
//!
//! - `Propagate` - the error fails the node (default)
//! - `Skip` - the node yields the zero value of its declared output type
//! - `Log` - like `Skip`, with the failure logged
//! - `Wrap` - the node yields a result union `{ok | err}` where the error
//!   arm carries the module name, message, and timestamp

use super::ErrorStrategy;
use crate::cvalue::{CType, CValue};
use crate::runtime::error::ExecutionError;
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::error;

/// The error payload carried by the Wrap strategy
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleError {
    pub module_name: String,
    pub error: String,
    pub timestamp: chrono::DateTime<Utc>,
}

impl ModuleError {
    fn schema() -> BTreeMap<String, CType> {
        [
            ("moduleName".to_string(), CType::String),
            ("error".to_string(), CType::String),
            ("timestamp".to_string(), CType::Int),
        ]
        .into_iter()
        .collect()
    }

    fn to_cvalue(&self) -> CValue {
        CValue::CProduct {
            fields: [
                (
                    "moduleName".to_string(),
                    CValue::CString(self.module_name.clone()),
                ),
                ("error".to_string(), CValue::CString(self.error.clone())),
                (
                    "timestamp".to_string(),
                    CValue::CInt(self.timestamp.timestamp_millis()),
                ),
            ]
            .into_iter()
            .collect(),
            schema: Self::schema(),
        }
    }
}

/// Union schema produced by the Wrap strategy for a given output type
pub fn wrap_variants(output_type: &CType) -> BTreeMap<String, CType> {
    [
        ("err".to_string(), CType::Product(ModuleError::schema())),
        ("ok".to_string(), output_type.clone()),
    ]
    .into_iter()
    .collect()
}

/// Apply a strategy to a module invocation result
pub fn apply(
    strategy: ErrorStrategy,
    module_name: &str,
    output_type: &CType,
    result: Result<CValue, ExecutionError>,
) -> Result<CValue, ExecutionError> {
    match strategy {
        ErrorStrategy::Propagate => result,

        ErrorStrategy::Skip => match result {
            Ok(value) => Ok(value),
            Err(_) => Ok(output_type.zero_value()),
        },

        ErrorStrategy::Log => match result {
            Ok(value) => Ok(value),
            Err(e) => {
                error!(module = module_name, error = %e, "module failed, substituting zero value");
                Ok(output_type.zero_value())
            }
        },

        ErrorStrategy::Wrap => {
            let variants = wrap_variants(output_type);
            match result {
                Ok(value) => Ok(CValue::CUnion {
                    payload: Box::new(value),
                    variants,
                    tag: "ok".to_string(),
                }),
                Err(e) => {
                    let module_error = ModuleError {
                        module_name: module_name.to_string(),
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    };
                    Ok(CValue::CUnion {
                        payload: Box::new(module_error.to_cvalue()),
                        variants,
                        tag: "err".to_string(),
                    })
                }
            }
        }
    }
}
