use std::collections::HashMap;

use arrow_schema::DataType;
use serde::{Deserialize, Serialize};

use crate::types::{implicit_convertible, is_primitive, type_name};

/// Method names a UDAF evaluator exposes. The group-by planner pairs them
/// per aggregation mode; the names are part of the plan so the runtime can
/// dispatch without reflection.
pub const ITERATE: &str = "iterate";
pub const MERGE: &str = "merge";
pub const TERMINATE: &str = "terminate";
pub const TERMINATE_PARTIAL: &str = "terminatePartial";

/// Resolved scalar function call: the function, the method to invoke, the
/// concrete argument types of the chosen overload, and the result type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdfDescriptor {
    pub name: String,
    pub method: String,
    pub arg_types: Vec<DataType>,
    pub return_type: DataType,
}

/// One UDAF evaluator: declared input parameters (for `iterate`), the
/// partial-aggregation shape (`merge` input / `terminatePartial` output),
/// the final result type, and the evaluator's state field types used for
/// memory estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdafDescriptor {
    pub name: String,
    pub iterate_args: Vec<DataType>,
    pub merge_args: Vec<DataType>,
    pub partial_type: DataType,
    pub return_type: DataType,
    pub state_types: Vec<DataType>,
}

impl UdafDescriptor {
    /// Declared parameter types of the given aggregation method.
    pub fn method_args(&self, method: &str) -> &[DataType] {
        if method == MERGE {
            &self.merge_args
        } else {
            &self.iterate_args
        }
    }

    /// Result type of the given evaluation method.
    pub fn method_return(&self, method: &str) -> &DataType {
        if method == TERMINATE_PARTIAL {
            &self.partial_type
        } else {
            &self.return_type
        }
    }
}

#[derive(Debug, Clone)]
struct UdfOverload {
    arg_types: Vec<DataType>,
    return_type: DataType,
}

/// Registry of scalar and aggregation functions with typed signatures.
///
/// Overload resolution prefers an exact match, then the candidate needing
/// the fewest implicit conversions. Conversion functions are addressed by
/// the target type's SQL name (`int`, `string`, ...), so a lookup of
/// `get_udf("bigint", [Int32])` yields a widening call descriptor.
#[derive(Debug)]
pub struct Registry {
    udfs: HashMap<String, Vec<UdfOverload>>,
    variadic_udfs: HashMap<String, DataType>,
    udafs: HashMap<String, Vec<UdafDescriptor>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Registry {
            udfs: HashMap::new(),
            variadic_udfs: HashMap::new(),
            udafs: HashMap::new(),
        }
    }

    /// The builtin function set: comparison and arithmetic operators,
    /// boolean connectives, numeric/string conversions, the sampling hash,
    /// and the standard aggregates.
    pub fn with_builtins() -> Self {
        let mut r = Registry::new();

        use DataType::{Boolean, Float64, Int32, Int64, Utf8};

        for op in ["=", "<>", "<", "<=", ">", ">="] {
            r.register_udf(op, vec![Float64, Float64], Boolean);
            r.register_udf(op, vec![Utf8, Utf8], Boolean);
        }
        r.register_udf("=", vec![Boolean, Boolean], Boolean);
        r.register_udf("<>", vec![Boolean, Boolean], Boolean);

        for op in ["+", "-", "*"] {
            r.register_udf(op, vec![Int32, Int32], Int32);
            r.register_udf(op, vec![Int64, Int64], Int64);
            r.register_udf(op, vec![Float64, Float64], Float64);
        }
        r.register_udf("/", vec![Float64, Float64], Float64);
        for op in ["%", "&"] {
            r.register_udf(op, vec![Int32, Int32], Int32);
            r.register_udf(op, vec![Int64, Int64], Int64);
        }

        r.register_udf("and", vec![Boolean, Boolean], Boolean);
        r.register_udf("or", vec![Boolean, Boolean], Boolean);
        r.register_udf("not", vec![Boolean], Boolean);

        // Conversions, addressed by target type name.
        let prims = [
            DataType::Boolean,
            DataType::Int8,
            DataType::Int16,
            DataType::Int32,
            DataType::Int64,
            DataType::Float32,
            DataType::Float64,
            DataType::Utf8,
        ];
        for target in &prims {
            let name = type_name(target).expect("primitive name");
            for from in &prims {
                r.register_udf(name, vec![from.clone()], target.clone());
            }
        }

        r.register_variadic_udf("default_sample_hashfn", Int32);

        r.register_udaf(UdafDescriptor {
            name: "count".to_string(),
            iterate_args: vec![Utf8],
            merge_args: vec![Int64],
            partial_type: Int64,
            return_type: Int64,
            state_types: vec![Int64],
        });
        r.register_udaf(UdafDescriptor {
            name: "sum".to_string(),
            iterate_args: vec![Float64],
            merge_args: vec![Float64],
            partial_type: Float64,
            return_type: Float64,
            state_types: vec![Float64],
        });
        // avg carries its partial state as "sum/count" text.
        r.register_udaf(UdafDescriptor {
            name: "avg".to_string(),
            iterate_args: vec![Float64],
            merge_args: vec![Utf8],
            partial_type: Utf8,
            return_type: Float64,
            state_types: vec![Float64, Int64],
        });
        for name in ["min", "max"] {
            r.register_udaf(UdafDescriptor {
                name: name.to_string(),
                iterate_args: vec![Float64],
                merge_args: vec![Float64],
                partial_type: Float64,
                return_type: Float64,
                state_types: vec![Float64],
            });
            r.register_udaf(UdafDescriptor {
                name: name.to_string(),
                iterate_args: vec![Utf8],
                merge_args: vec![Utf8],
                partial_type: Utf8,
                return_type: Utf8,
                state_types: vec![Utf8],
            });
        }

        r
    }

    /// Register a scalar overload.
    pub fn register_udf(
        &mut self,
        name: &str,
        arg_types: Vec<DataType>,
        return_type: DataType,
    ) {
        self.udfs
            .entry(name.to_lowercase())
            .or_default()
            .push(UdfOverload {
                arg_types,
                return_type,
            });
    }

    /// Register a scalar function accepting any number of primitive args.
    pub fn register_variadic_udf(&mut self, name: &str, return_type: DataType) {
        self.variadic_udfs.insert(name.to_lowercase(), return_type);
    }

    /// Register a UDAF evaluator overload.
    pub fn register_udaf(&mut self, desc: UdafDescriptor) {
        self.udafs
            .entry(desc.name.to_lowercase())
            .or_default()
            .push(desc);
    }

    /// Whether `name` is a known aggregation function.
    pub fn is_udaf(&self, name: &str) -> bool {
        self.udafs.contains_key(&name.to_lowercase())
    }

    /// Whether `name` is a known scalar function.
    pub fn is_udf(&self, name: &str) -> bool {
        let key = name.to_lowercase();
        self.udfs.contains_key(&key) || self.variadic_udfs.contains_key(&key)
    }

    /// Resolve a scalar overload for the actual argument types; `None`
    /// when the function is unknown or no overload accepts the arguments.
    pub fn get_udf(&self, name: &str, actual: &[DataType]) -> Option<UdfDescriptor> {
        let key = name.to_lowercase();
        if let Some(ret) = self.variadic_udfs.get(&key) {
            if actual.iter().all(is_primitive) {
                return Some(UdfDescriptor {
                    name: key,
                    method: "evaluate".to_string(),
                    arg_types: actual.to_vec(),
                    return_type: ret.clone(),
                });
            }
            return None;
        }
        let overloads = self.udfs.get(&key)?;
        let mut best: Option<(u32, &UdfOverload)> = None;
        for o in overloads {
            if let Some(cost) = conversion_cost(&o.arg_types, actual) {
                if best.as_ref().map(|(c, _)| cost < *c).unwrap_or(true) {
                    best = Some((cost, o));
                }
            }
        }
        best.map(|(_, o)| UdfDescriptor {
            name: key,
            method: "evaluate".to_string(),
            arg_types: o.arg_types.clone(),
            return_type: o.return_type.clone(),
        })
    }

    /// Resolve a UDAF evaluator for the actual `iterate` argument types.
    pub fn get_udaf_evaluator(&self, name: &str, actual: &[DataType]) -> Option<UdafDescriptor> {
        let overloads = self.udafs.get(&name.to_lowercase())?;
        let mut best: Option<(u32, &UdafDescriptor)> = None;
        for o in overloads {
            if let Some(cost) = conversion_cost(&o.iterate_args, actual) {
                if best.as_ref().map(|(c, _)| cost < *c).unwrap_or(true) {
                    best = Some((cost, o));
                }
            }
        }
        best.map(|(_, o)| o.clone())
    }

    /// Conversion call descriptor from `from` to `target`; `None` when
    /// either side is not primitive.
    pub fn get_conversion_udf(&self, target: &DataType, from: &DataType) -> Option<UdfDescriptor> {
        if !is_primitive(target) || !is_primitive(from) {
            return None;
        }
        Some(UdfDescriptor {
            name: type_name(target).expect("primitive name").to_string(),
            method: "evaluate".to_string(),
            arg_types: vec![from.clone()],
            return_type: target.clone(),
        })
    }
}

/// Number of implicit conversions needed to pass `actual` to `formal`;
/// `None` when arity differs or some argument is not convertible.
fn conversion_cost(formal: &[DataType], actual: &[DataType]) -> Option<u32> {
    if formal.len() != actual.len() {
        return None;
    }
    let mut cost = 0;
    for (f, a) in formal.iter().zip(actual.iter()) {
        if f == a {
            continue;
        }
        if !implicit_convertible(a, f) {
            return None;
        }
        cost += 1;
    }
    Some(cost)
}

#[cfg(test)]
mod tests {
    use arrow_schema::DataType;

    use super::Registry;

    #[test]
    fn exact_overload_wins() {
        let r = Registry::with_builtins();
        let plus = r
            .get_udf("+", &[DataType::Int32, DataType::Int32])
            .expect("resolve +");
        assert_eq!(plus.return_type, DataType::Int32);
    }

    #[test]
    fn widening_picks_cheapest_overload() {
        let r = Registry::with_builtins();
        let plus = r
            .get_udf("+", &[DataType::Int32, DataType::Int64])
            .expect("resolve +");
        assert_eq!(plus.return_type, DataType::Int64);
    }

    #[test]
    fn string_compare_does_not_widen_to_numeric() {
        let r = Registry::with_builtins();
        let eq = r
            .get_udf("=", &[DataType::Utf8, DataType::Utf8])
            .expect("resolve =");
        assert_eq!(eq.arg_types, vec![DataType::Utf8, DataType::Utf8]);
        assert_eq!(eq.return_type, DataType::Boolean);
    }

    #[test]
    fn conversion_udf_named_after_target() {
        let r = Registry::with_builtins();
        let conv = r
            .get_conversion_udf(&DataType::Int64, &DataType::Int32)
            .expect("conversion");
        assert_eq!(conv.name, "bigint");
        assert_eq!(conv.return_type, DataType::Int64);
    }

    #[test]
    fn udaf_overloads_by_input_type() {
        let r = Registry::with_builtins();
        let num = r
            .get_udaf_evaluator("min", &[DataType::Int32])
            .expect("min numeric");
        assert_eq!(num.return_type, DataType::Float64);
        let s = r
            .get_udaf_evaluator("min", &[DataType::Utf8])
            .expect("min string");
        assert_eq!(s.return_type, DataType::Utf8);
        assert!(r.is_udaf("COUNT"));
        assert!(!r.is_udaf("nope"));
    }

    #[test]
    fn sample_hash_accepts_any_primitives() {
        let r = Registry::with_builtins();
        let h = r
            .get_udf("default_sample_hashfn", &[DataType::Utf8, DataType::Int64])
            .expect("hash fn");
        assert_eq!(h.return_type, DataType::Int32);
        assert_eq!(h.arg_types.len(), 2);
    }
}
