//! Parameter resolution: effective-type choice, numeric coercion, and
//! domain validation.
//!
//! Rules:
//! - A declared `type:` always wins.
//! - Otherwise a domain drives inference (interval → float, downgraded to
//!   int when the default and both bounds are ints; set → str when every
//!   entry is a string, else int unless any entry is a float).
//! - Otherwise the literal type of the default is used.
//! - `int → float` coerces; `float → int` only when exactly integral;
//!   bool and str never coerce.

use crate::errors::{Error, Result};

use super::model::{
    Domain, DomainRaw, EffectiveType, IntervalRaw, ParamName, ParamResolved, ParamUnresolved,
    SetRaw, ValueLiteral,
};

pub fn resolve_param(pu: ParamUnresolved) -> Result<ParamResolved> {
    let effective_type = choose_type(&pu)?;
    let default = coerce(&pu.name, &pu.default, effective_type)?;
    let domain = pu
        .domain
        .as_ref()
        .map(|raw| resolve_domain(&pu.name, raw, effective_type))
        .transpose()?;

    if let Some(dom) = &domain {
        if !dom.contains(&default) {
            return Err(Error::domain_error(
                pu.name.as_str(),
                format!("default value {default} is not within the declared domain"),
            ));
        }
    }

    Ok(ParamResolved {
        name: pu.name,
        default,
        effective_type,
        domain,
        description: pu.description,
        placeholder: pu.placeholder,
    })
}

fn choose_type(pu: &ParamUnresolved) -> Result<EffectiveType> {
    if let Some(label) = &pu.declared_type {
        return EffectiveType::from_keyword(label).ok_or_else(|| {
            Error::type_error(
                pu.name.as_str(),
                format!("unknown type label {label:?} (expected str/int/float/bool)"),
            )
        });
    }

    if let Some(domain) = &pu.domain {
        let inferred = infer_type_from_domain(&pu.name, domain)?;
        // Numeric downgrade: an all-integral interval with an int default
        // stays int.
        if inferred == EffectiveType::Float && matches!(pu.default, ValueLiteral::Int(_)) {
            if let DomainRaw::Interval(iv) = domain {
                if matches!(iv.lower, ValueLiteral::Int(_)) && matches!(iv.upper, ValueLiteral::Int(_)) {
                    return Ok(EffectiveType::Int);
                }
            }
        }
        return Ok(inferred);
    }

    Ok(match pu.default {
        ValueLiteral::Str(_) => EffectiveType::Str,
        ValueLiteral::Int(_) => EffectiveType::Int,
        ValueLiteral::Float(_) => EffectiveType::Float,
        ValueLiteral::Bool(_) => EffectiveType::Bool,
    })
}

fn infer_type_from_domain(name: &ParamName, domain: &DomainRaw) -> Result<EffectiveType> {
    match domain {
        // Safest numeric superset; the caller may downgrade to int.
        DomainRaw::Interval(_) => Ok(EffectiveType::Float),
        DomainRaw::Set(SetRaw { entries }) => {
            let all_str = entries.iter().all(|v| matches!(v, ValueLiteral::Str(_)));
            let all_num = entries.iter().all(ValueLiteral::is_numeric);
            if all_str {
                Ok(EffectiveType::Str)
            } else if all_num {
                if entries.iter().any(|v| matches!(v, ValueLiteral::Float(_))) {
                    Ok(EffectiveType::Float)
                } else {
                    Ok(EffectiveType::Int)
                }
            } else {
                Err(Error::type_error(
                    name.as_str(),
                    "set domain mixes strings and numbers; cannot infer a type",
                ))
            }
        }
    }
}

/// Coerce a literal to the target type under the numeric-only rules.
pub(crate) fn coerce(
    name: &ParamName,
    value: &ValueLiteral,
    target: EffectiveType,
) -> Result<ValueLiteral> {
    match target {
        EffectiveType::Str => match value {
            ValueLiteral::Str(_) => Ok(value.clone()),
            other => Err(Error::type_error(
                name.as_str(),
                format!("cannot coerce {} to str", other.type_name()),
            )),
        },
        EffectiveType::Bool => match value {
            ValueLiteral::Bool(_) => Ok(value.clone()),
            other => Err(Error::type_error(
                name.as_str(),
                format!("cannot coerce {} to bool", other.type_name()),
            )),
        },
        EffectiveType::Float => match value {
            ValueLiteral::Float(_) => Ok(value.clone()),
            ValueLiteral::Int(i) => Ok(ValueLiteral::Float(*i as f64)),
            other => Err(Error::type_error(
                name.as_str(),
                format!("cannot coerce {} to float", other.type_name()),
            )),
        },
        EffectiveType::Int => match value {
            ValueLiteral::Int(_) => Ok(value.clone()),
            ValueLiteral::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64
                {
                    Ok(ValueLiteral::Int(*f as i64))
                } else {
                    Err(Error::type_error(
                        name.as_str(),
                        format!("float {f} is not an integer; cannot coerce to int"),
                    ))
                }
            }
            other => Err(Error::type_error(
                name.as_str(),
                format!("cannot coerce {} to int", other.type_name()),
            )),
        },
    }
}

fn resolve_domain(name: &ParamName, raw: &DomainRaw, target: EffectiveType) -> Result<Domain> {
    match raw {
        DomainRaw::Interval(iv) => resolve_interval(name, iv, target),
        DomainRaw::Set(s) => resolve_set(name, s, target),
    }
}

fn resolve_interval(name: &ParamName, iv: &IntervalRaw, target: EffectiveType) -> Result<Domain> {
    if !matches!(target, EffectiveType::Int | EffectiveType::Float) {
        return Err(Error::type_error(
            name.as_str(),
            format!("interval domains are only valid for numeric types, not {target}"),
        ));
    }

    let inclusive_lower = iv.lpar == '[';
    let inclusive_upper = iv.rpar == ']';
    let lower = coerce(name, &iv.lower, target)?;
    let upper = coerce(name, &iv.upper, target)?;

    let lo = lower.as_number().expect("coerced bound is numeric");
    let hi = upper.as_number().expect("coerced bound is numeric");
    if hi < lo || (hi == lo && !(inclusive_lower && inclusive_upper)) {
        return Err(Error::domain_error(
            name.as_str(),
            format!(
                "invalid interval domain: {}{}, {}{}",
                iv.lpar, iv.lower, iv.upper, iv.rpar
            ),
        ));
    }

    Ok(Domain::Interval {
        lower,
        upper,
        inclusive_lower,
        inclusive_upper,
    })
}

fn resolve_set(name: &ParamName, s: &SetRaw, target: EffectiveType) -> Result<Domain> {
    if target == EffectiveType::Bool {
        return Err(Error::type_error(
            name.as_str(),
            "set domains do not support bool elements",
        ));
    }
    let mut values = Vec::with_capacity(s.entries.len());
    for entry in &s.entries {
        let coerced = coerce(name, entry, target)?;
        if !values.contains(&coerced) {
            values.push(coerced);
        }
    }
    Ok(Domain::Set { values })
}
