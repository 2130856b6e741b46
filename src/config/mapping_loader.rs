// ==========================================
// Molecular data portal - mapping loader
// ==========================================
// Role: parse the declarative data mapping (JSON) into a DataMapping
// Errors: every structural problem names its JSON key path,
//         e.g. `$.event.eventDate.validation`
// Side effects: none besides reading the file
// ==========================================

use crate::domain::mapping::{
    CoverageRule, DataMapping, Derivation, DistinctSpec, FieldDescriptor, FieldType,
    ReconcileSpec, ReferenceDescriptor, TableDescriptor, UnpivotSpec,
};
use crate::domain::table::Value;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::to_snake_case;
use regex::Regex;
use serde_json::{Map, Value as Json};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

const TABLE_KEYS: &[&str] = &[
    "targetTable",
    "returning",
    "upsertKey",
    "derivedFrom",
    "optional",
    "unpivot",
    "coveredBy",
    "reconcile",
];

const FIELD_KEYS: &[&str] = &[
    "field",
    "default",
    "validation",
    "type",
    "unique",
    "insert",
    "references",
    "derive",
];

/// Reads and parses a mapping file.
pub fn load_mapping(path: &Path) -> ImportResult<DataMapping> {
    let text = std::fs::read_to_string(path).map_err(|e| ImportError::MappingFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let mapping = load_mapping_str(&text)?;
    debug!(
        path = %path.display(),
        sheets = mapping.tables().len(),
        "mapping loaded"
    );
    Ok(mapping)
}

/// Parses mapping JSON text.
pub fn load_mapping_str(text: &str) -> ImportResult<DataMapping> {
    let doc: Json =
        serde_json::from_str(text).map_err(|e| ImportError::MappingSyntax(e.to_string()))?;
    parse_mapping(&doc)
}

/// Converts a parsed JSON document into a checked DataMapping.
pub fn parse_mapping(doc: &Json) -> ImportResult<DataMapping> {
    let root = as_object(doc, "$")?;

    let mut tables = Vec::with_capacity(root.len());
    for (alias, value) in root {
        let path = format!("$.{}", alias);
        tables.push(parse_table(alias, value, &path)?);
    }

    check_cross_references(&tables)?;
    Ok(DataMapping::new(tables))
}

// ==========================================
// Table descriptor
// ==========================================

fn parse_table(alias: &str, value: &Json, path: &str) -> ImportResult<TableDescriptor> {
    let obj = as_object(value, path)?;

    let mut table = TableDescriptor {
        alias: alias.to_string(),
        target_table: opt_string(obj, "targetTable", path)?,
        returning: opt_string(obj, "returning", path)?,
        upsert_key: opt_string(obj, "upsertKey", path)?,
        derived_from: opt_string(obj, "derivedFrom", path)?,
        optional: opt_bool(obj, "optional", path)?.unwrap_or(false),
        unpivot: None,
        covered_by: Vec::new(),
        reconcile: None,
        fields: Vec::new(),
    };

    if let Some(v) = obj.get("unpivot") {
        table.unpivot = Some(parse_unpivot(v, &format!("{}.unpivot", path))?);
    }
    if let Some(v) = obj.get("coveredBy") {
        table.covered_by = parse_covered_by(v, &format!("{}.coveredBy", path))?;
    }
    if let Some(v) = obj.get("reconcile") {
        table.reconcile = Some(parse_reconcile(v, &format!("{}.reconcile", path))?);
    }

    for (name, field_value) in obj {
        if TABLE_KEYS.contains(&name.as_str()) {
            continue;
        }
        let field_path = format!("{}.{}", path, name);
        table.fields.push(parse_field(name, field_value, &field_path)?);
    }

    let mut targets = HashSet::new();
    for field in table.insert_fields() {
        if !targets.insert(field.target.as_str()) {
            return Err(ImportError::invalid_mapping(
                format!("{}.{}.field", path, field.name),
                format!("destination column '{}' is declared twice", field.target),
            ));
        }
    }

    if table.target_table.is_none() {
        for key in ["returning", "upsertKey", "reconcile"] {
            if obj.contains_key(key) {
                return Err(ImportError::invalid_mapping(
                    format!("{}.{}", path, key),
                    "requires targetTable",
                ));
            }
        }
    }

    if let Some(key) = &table.upsert_key {
        let declared = table.field(key).map_or(false, |f| f.insert);
        if !declared {
            return Err(ImportError::invalid_mapping(
                format!("{}.upsertKey", path),
                format!("'{}' is not an inserted field of this sheet", key),
            ));
        }
        if table.returning.is_none() {
            return Err(ImportError::invalid_mapping(
                format!("{}.upsertKey", path),
                "content-addressed tables must declare returning",
            ));
        }
    }

    if let Some(spec) = &table.reconcile {
        check_reconcile(&table, spec, path)?;
    }

    Ok(table)
}

fn parse_unpivot(value: &Json, path: &str) -> ImportResult<UnpivotSpec> {
    let obj = as_object(value, path)?;
    reject_unknown(
        obj,
        &["idColumns", "variableColumn", "valueColumn", "into", "distinct"],
        path,
    )?;

    let distinct = match obj.get("distinct") {
        None => None,
        Some(v) => {
            let dpath = format!("{}.distinct", path);
            let dobj = as_object(v, &dpath)?;
            reject_unknown(dobj, &["sheet", "columns"], &dpath)?;
            Some(DistinctSpec {
                sheet: req_string(dobj, "sheet", &dpath)?,
                columns: string_list(
                    required(dobj, "columns", &dpath)?,
                    &format!("{}.columns", dpath),
                )?,
            })
        }
    };

    Ok(UnpivotSpec {
        id_columns: string_list(
            required(obj, "idColumns", path)?,
            &format!("{}.idColumns", path),
        )?,
        variable_column: req_string(obj, "variableColumn", path)?,
        value_column: req_string(obj, "valueColumn", path)?,
        into: req_string(obj, "into", path)?,
        distinct,
    })
}

fn parse_covered_by(value: &Json, path: &str) -> ImportResult<Vec<CoverageRule>> {
    let items = value
        .as_array()
        .ok_or_else(|| ImportError::invalid_mapping(path, "expected an array"))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let ipath = format!("{}[{}]", path, i);
            let obj = as_object(item, &ipath)?;
            reject_unknown(obj, &["sheet", "key", "field"], &ipath)?;
            let key = req_string(obj, "key", &ipath)?;
            Ok(CoverageRule {
                sheet: req_string(obj, "sheet", &ipath)?,
                field: opt_string(obj, "field", &ipath)?.unwrap_or_else(|| key.clone()),
                key,
            })
        })
        .collect()
}

fn parse_reconcile(value: &Json, path: &str) -> ImportResult<ReconcileSpec> {
    let obj = as_object(value, path)?;
    reject_unknown(
        obj,
        &["entityField", "targetField", "predictionField", "statusField"],
        path,
    )?;
    Ok(ReconcileSpec {
        entity_field: req_string(obj, "entityField", path)?,
        target_field: req_string(obj, "targetField", path)?,
        prediction_field: req_string(obj, "predictionField", path)?,
        status_field: req_string(obj, "statusField", path)?,
    })
}

fn check_reconcile(table: &TableDescriptor, spec: &ReconcileSpec, path: &str) -> ImportResult<()> {
    if table.returning.is_none() {
        return Err(ImportError::invalid_mapping(
            format!("{}.reconcile", path),
            "reconciled tables must declare returning",
        ));
    }

    let columns = [
        ("entityField", &spec.entity_field),
        ("targetField", &spec.target_field),
        ("predictionField", &spec.prediction_field),
        ("statusField", &spec.status_field),
    ];
    for (key, column) in columns {
        if table.field_by_target(column).filter(|f| f.insert).is_none() {
            return Err(ImportError::invalid_mapping(
                format!("{}.reconcile.{}", path, key),
                format!("'{}' is not an inserted column of this table", column),
            ));
        }
    }

    let entity_has_reference = table
        .field_by_target(&spec.entity_field)
        .map_or(false, |f| f.references.is_some());
    if !entity_has_reference {
        return Err(ImportError::invalid_mapping(
            format!("{}.reconcile.entityField", path),
            format!("'{}' must reference the annotated entity table", spec.entity_field),
        ));
    }
    Ok(())
}

// ==========================================
// Field descriptor
// ==========================================

fn parse_field(name: &str, value: &Json, path: &str) -> ImportResult<FieldDescriptor> {
    let obj = as_object(value, path)?;
    reject_unknown(obj, FIELD_KEYS, path)?;

    let pattern = opt_string(obj, "validation", path)?;
    let validation = match &pattern {
        None => None,
        Some(p) => Some(Regex::new(&format!("^(?:{})$", p)).map_err(|e| {
            ImportError::invalid_mapping(format!("{}.validation", path), e.to_string())
        })?),
    };

    let field_type = match opt_string(obj, "type", path)? {
        None => None,
        Some(t) => Some(FieldType::parse(&t).ok_or_else(|| {
            ImportError::invalid_mapping(
                format!("{}.type", path),
                format!("unknown type '{}'", t),
            )
        })?),
    };

    let references = match obj.get("references") {
        None => None,
        Some(v) => Some(parse_reference(v, &format!("{}.references", path))?),
    };

    let derive = match obj.get("derive") {
        None => None,
        Some(v) => Some(parse_derive(v, &format!("{}.derive", path))?),
    };

    Ok(FieldDescriptor {
        name: name.to_string(),
        target: opt_string(obj, "field", path)?.unwrap_or_else(|| to_snake_case(name)),
        default: obj.get("default").map(Value::from_json),
        pattern,
        validation,
        field_type,
        unique: opt_bool(obj, "unique", path)?.unwrap_or(false),
        insert: opt_bool(obj, "insert", path)?.unwrap_or(true),
        references,
        derive,
    })
}

fn parse_reference(value: &Json, path: &str) -> ImportResult<ReferenceDescriptor> {
    match value {
        Json::String(s) => {
            let (table, column) = s
                .split_once('.')
                .filter(|(t, c)| !t.is_empty() && !c.is_empty())
                .ok_or_else(|| {
                    ImportError::invalid_mapping(path, format!("expected 'table.column', got '{}'", s))
                })?;
            Ok(ReferenceDescriptor {
                table: table.to_string(),
                column: column.to_string(),
                join_on: None,
            })
        }
        Json::Object(obj) => {
            reject_unknown(obj, &["table", "column", "joinOn"], path)?;
            Ok(ReferenceDescriptor {
                table: req_string(obj, "table", path)?,
                column: req_string(obj, "column", path)?,
                join_on: opt_string(obj, "joinOn", path)?,
            })
        }
        _ => Err(ImportError::invalid_mapping(
            path,
            "expected 'table.column' or an object",
        )),
    }
}

fn parse_derive(value: &Json, path: &str) -> ImportResult<Derivation> {
    let obj = as_object(value, path)?;
    if obj.contains_key("concat") {
        reject_unknown(obj, &["concat", "separator"], path)?;
        let sources = string_list(required(obj, "concat", path)?, &format!("{}.concat", path))?;
        return Ok(Derivation::Concat {
            sources,
            separator: opt_string(obj, "separator", path)?.unwrap_or_default(),
        });
    }
    if obj.contains_key("digest") {
        reject_unknown(obj, &["digest", "prefix"], path)?;
        return Ok(Derivation::Digest {
            source: req_string(obj, "digest", path)?,
            prefix: opt_string(obj, "prefix", path)?.unwrap_or_default(),
        });
    }
    Err(ImportError::invalid_mapping(
        path,
        "expected 'concat' or 'digest'",
    ))
}

// ==========================================
// Cross-sheet checks
// ==========================================

fn check_cross_references(tables: &[TableDescriptor]) -> ImportResult<()> {
    let aliases: HashSet<&str> = tables.iter().map(|t| t.alias.as_str()).collect();

    let mut targets = HashSet::new();
    for table in tables {
        if let Some(target) = &table.target_table {
            if !targets.insert(target.as_str()) {
                return Err(ImportError::invalid_mapping(
                    format!("$.{}.targetTable", table.alias),
                    format!("table '{}' is the target of more than one sheet", target),
                ));
            }
        }
    }

    for table in tables {
        let path = format!("$.{}", table.alias);

        for field in &table.fields {
            if let Some(reference) = &field.references {
                if !targets.contains(reference.table.as_str()) {
                    return Err(ImportError::invalid_mapping(
                        format!("{}.{}.references", path, field.name),
                        format!("unknown table '{}'", reference.table),
                    ));
                }
            }
        }

        for (i, rule) in table.covered_by.iter().enumerate() {
            if !aliases.contains(rule.sheet.as_str()) {
                return Err(ImportError::invalid_mapping(
                    format!("{}.coveredBy[{}].sheet", path, i),
                    format!("unknown sheet '{}'", rule.sheet),
                ));
            }
        }

        if let Some(source) = &table.derived_from {
            let produced = tables
                .iter()
                .find(|t| &t.alias == source)
                .and_then(|t| t.unpivot.as_ref())
                .map_or(false, |u| {
                    u.into == table.alias
                        || u.distinct.as_ref().map_or(false, |d| d.sheet == table.alias)
                });
            if !produced {
                return Err(ImportError::invalid_mapping(
                    format!("{}.derivedFrom", path),
                    format!("sheet '{}' does not produce '{}'", source, table.alias),
                ));
            }
        }

        if let Some(unpivot) = &table.unpivot {
            let mut produced = vec![(unpivot.into.as_str(), "into")];
            if let Some(d) = &unpivot.distinct {
                produced.push((d.sheet.as_str(), "distinct.sheet"));
            }
            for (sheet, key) in produced {
                let derived = tables
                    .iter()
                    .find(|t| t.alias == sheet)
                    .and_then(|t| t.derived_from.as_deref());
                if derived != Some(table.alias.as_str()) {
                    return Err(ImportError::invalid_mapping(
                        format!("{}.unpivot.{}", path, key),
                        format!("sheet '{}' must declare derivedFrom '{}'", sheet, table.alias),
                    ));
                }
            }
        }
    }
    Ok(())
}

// ==========================================
// JSON helpers
// ==========================================

fn as_object<'a>(value: &'a Json, path: &str) -> ImportResult<&'a Map<String, Json>> {
    value
        .as_object()
        .ok_or_else(|| ImportError::invalid_mapping(path, "expected an object"))
}

fn reject_unknown(obj: &Map<String, Json>, allowed: &[&str], path: &str) -> ImportResult<()> {
    match obj.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => Err(ImportError::invalid_mapping(
            format!("{}.{}", path, key),
            "unknown key",
        )),
        None => Ok(()),
    }
}

fn required<'a>(obj: &'a Map<String, Json>, key: &str, path: &str) -> ImportResult<&'a Json> {
    obj.get(key)
        .ok_or_else(|| ImportError::invalid_mapping(format!("{}.{}", path, key), "missing key"))
}

fn opt_string(obj: &Map<String, Json>, key: &str, path: &str) -> ImportResult<Option<String>> {
    match obj.get(key) {
        None => Ok(None),
        Some(Json::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ImportError::invalid_mapping(
            format!("{}.{}", path, key),
            "expected a string",
        )),
    }
}

fn req_string(obj: &Map<String, Json>, key: &str, path: &str) -> ImportResult<String> {
    opt_string(obj, key, path)?
        .ok_or_else(|| ImportError::invalid_mapping(format!("{}.{}", path, key), "missing key"))
}

fn opt_bool(obj: &Map<String, Json>, key: &str, path: &str) -> ImportResult<Option<bool>> {
    match obj.get(key) {
        None => Ok(None),
        Some(Json::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ImportError::invalid_mapping(
            format!("{}.{}", path, key),
            "expected a boolean",
        )),
    }
}

fn string_list(value: &Json, path: &str) -> ImportResult<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| ImportError::invalid_mapping(path, "expected an array of strings"))?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                ImportError::invalid_mapping(format!("{}[{}]", path, i), "expected a string")
            })
        })
        .collect()
}
