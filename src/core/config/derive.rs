//! Macros for implementing [`ConfigValidator`](super::ConfigValidator).

/// Implements `ConfigValidator` from a list of per-field rules.
///
/// Supported rules: `range(min, max)`, `min(value)`, `optional_range(min, max)`,
/// `optional_min(value)`, `path`, `optional_path`.
///
/// ```rust
/// use leafdx::impl_config_validator;
/// use leafdx::core::config::ConfigValidator;
///
/// #[derive(Debug, Default)]
/// pub struct GateConfig {
///     pub threshold: f32,
///     pub retries: usize,
/// }
///
/// impl_config_validator!(GateConfig {
///     threshold: range(0.0, 100.0),
///     retries: min(1),
/// });
///
/// assert!(GateConfig { threshold: 50.0, retries: 1 }.validate().is_ok());
/// assert!(GateConfig { threshold: 150.0, retries: 1 }.validate().is_err());
/// ```
#[macro_export]
macro_rules! impl_config_validator {
    ($type_name:ident { $($field:ident: $validator:ident $(($($args:tt)*))?),* $(,)? }) => {
        impl $crate::core::config::ConfigValidator for $type_name {
            fn validate(&self) -> Result<(), $crate::core::config::ConfigError> {
                $(
                    $crate::validate_field!(self, $field, $validator $(($($args)*))?);
                )*
                Ok(())
            }
        }
    };
}

/// Helper macro for field validation.
#[macro_export]
macro_rules! validate_field {
    ($self:expr, $field:ident, range($min:expr, $max:expr)) => {
        if !($min..=$max).contains(&$self.$field) {
            return Err($crate::core::config::ConfigError::InvalidConfig {
                message: format!(
                    "{} must be between {} and {}",
                    stringify!($field),
                    $min,
                    $max
                ),
            });
        }
    };

    ($self:expr, $field:ident, min($min_val:expr)) => {
        if $self.$field < $min_val {
            return Err($crate::core::config::ConfigError::InvalidConfig {
                message: format!("{} must be at least {}", stringify!($field), $min_val),
            });
        }
    };

    ($self:expr, $field:ident, optional_range($min:expr, $max:expr)) => {
        if let Some(value) = $self.$field {
            if !($min..=$max).contains(&value) {
                return Err($crate::core::config::ConfigError::InvalidConfig {
                    message: format!(
                        "{} must be between {} and {}",
                        stringify!($field),
                        $min,
                        $max
                    ),
                });
            }
        }
    };

    ($self:expr, $field:ident, optional_min($min_val:expr)) => {
        if let Some(value) = $self.$field {
            if value < $min_val {
                return Err($crate::core::config::ConfigError::InvalidConfig {
                    message: format!("{} must be at least {}", stringify!($field), $min_val),
                });
            }
        }
    };

    ($self:expr, $field:ident, path) => {
        $self.validate_file_path(&$self.$field)?;
    };

    ($self:expr, $field:ident, optional_path) => {
        if let Some(ref path) = $self.$field {
            $self.validate_file_path(path)?;
        }
    };
}
