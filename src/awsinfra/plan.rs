//! Editable proposed-asset plan for an AWS Infra token.
//!
//! The backend proposes a plan after inventorying the customer account; the
//! user then edits it (rename, add, remove, exclude from alerting) before it is
//! saved. [`PlanEditor`] is the only writer of that state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AssetType {
    S3Bucket,
    SQSQueue,
    SSMParameter,
    SecretsManagerSecret,
    DynamoDBTable,
}

impl AssetType {
    pub const ALL: [AssetType; 5] = [
        AssetType::S3Bucket,
        AssetType::SQSQueue,
        AssetType::SSMParameter,
        AssetType::SecretsManagerSecret,
        AssetType::DynamoDBTable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::S3Bucket => "S3Bucket",
            AssetType::SQSQueue => "SQSQueue",
            AssetType::SSMParameter => "SSMParameter",
            AssetType::SecretsManagerSecret => "SecretsManagerSecret",
            AssetType::DynamoDBTable => "DynamoDBTable",
        }
    }

    /// Wire key of the required primary name.
    pub fn name_field(&self) -> &'static str {
        match self {
            AssetType::S3Bucket => "bucket_name",
            AssetType::SQSQueue => "queue_name",
            AssetType::SSMParameter => "ssm_parameter_name",
            AssetType::SecretsManagerSecret => "secret_name",
            AssetType::DynamoDBTable => "table_name",
        }
    }

    /// Wire key of the child list the backend can generate names for.
    pub fn ai_field(&self) -> Option<&'static str> {
        match self {
            AssetType::S3Bucket => Some("objects"),
            AssetType::DynamoDBTable => Some("table_items"),
            _ => None,
        }
    }

    pub fn supports_ai(&self) -> bool {
        self.ai_field().is_some()
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssetType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown asset type: {}", s))
    }
}

/// One decoy asset in the plan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Asset {
    pub name: String,
    /// Object paths (S3) or row keys (DynamoDB). `None` for types without one.
    pub children: Option<Vec<String>>,
    pub off_inventory: bool,
    /// Fields this crate does not interpret, kept for the round trip to the backend.
    pub extra: Map<String, Value>,
}

impl Asset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_children(mut self, children: Vec<String>) -> Self {
        self.children = Some(children);
        self
    }

    fn from_wire(ty: AssetType, value: Value) -> Result<Self, AppError> {
        let Value::Object(mut fields) = value else {
            return Err(AppError::InvalidResponse(format!("{} entry is not an object", ty)));
        };

        let name = match fields.remove(ty.name_field()) {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            _ => {
                return Err(AppError::InvalidResponse(format!(
                    "{} entry is missing '{}'",
                    ty,
                    ty.name_field()
                )))
            }
        };

        let children = match ty.ai_field().and_then(|f| fields.remove(f)) {
            Some(Value::Array(items)) => Some(
                items
                    .into_iter()
                    .map(|v| match v {
                        Value::String(s) => Ok(s),
                        other => Err(AppError::InvalidResponse(format!(
                            "{} child is not a string: {}",
                            ty, other
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(AppError::InvalidResponse(format!(
                    "{} children must be a list, got {}",
                    ty, other
                )))
            }
        };

        let off_inventory = fields
            .remove("off_inventory")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Ok(Self {
            name,
            children,
            off_inventory,
            extra: fields,
        })
    }

    fn to_wire(&self, ty: AssetType) -> Value {
        let mut fields = self.extra.clone();
        fields.insert(ty.name_field().to_string(), Value::String(self.name.clone()));
        if let (Some(field), Some(children)) = (ty.ai_field(), &self.children) {
            fields.insert(field.to_string(), json!(children));
        }
        fields.insert("off_inventory".to_string(), Value::Bool(self.off_inventory));
        Value::Object(fields)
    }
}

/// The full plan. Every asset type always has an entry, possibly empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    assets: BTreeMap<AssetType, Vec<Asset>>,
}

impl Default for Plan {
    fn default() -> Self {
        Self {
            assets: AssetType::ALL.into_iter().map(|t| (t, Vec::new())).collect(),
        }
    }
}

impl Plan {
    /// Parse a backend plan, either `{"assets": {...}}` or the bare asset map.
    /// Missing asset types become empty lists; unknown ones are rejected.
    pub fn from_wire(value: Value) -> Result<Self, AppError> {
        let value = match value {
            Value::Object(mut obj) if matches!(obj.get("assets"), Some(Value::Object(_))) => {
                obj.remove("assets").unwrap_or_default()
            }
            other => other,
        };
        let Value::Object(map) = value else {
            return Err(AppError::InvalidResponse("plan is not an object".into()));
        };

        let mut plan = Plan::default();
        for (key, entries) in map {
            let ty: AssetType = key.parse().map_err(AppError::InvalidResponse)?;
            let entries = match entries {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => {
                    return Err(AppError::InvalidResponse(format!(
                        "{} must be a list, got {}",
                        ty, other
                    )))
                }
            };
            let parsed = entries
                .into_iter()
                .map(|e| Asset::from_wire(ty, e))
                .collect::<Result<Vec<_>, _>>()?;
            plan.assets.insert(ty, parsed);
        }
        Ok(plan)
    }

    pub fn to_wire(&self) -> Value {
        let assets: Map<String, Value> = self
            .assets
            .iter()
            .map(|(ty, list)| {
                (
                    ty.as_str().to_string(),
                    Value::Array(list.iter().map(|a| a.to_wire(*ty)).collect()),
                )
            })
            .collect();
        json!({ "assets": assets })
    }

    pub fn assets(&self, ty: AssetType) -> &[Asset] {
        self.assets.get(&ty).map(Vec::as_slice).unwrap_or(&[])
    }

    fn list_mut(&mut self, ty: AssetType) -> &mut Vec<Asset> {
        self.assets.entry(ty).or_default()
    }

    pub fn asset_types(&self) -> impl Iterator<Item = AssetType> + '_ {
        self.assets.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.assets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where [`PlanEditor::set_asset_field`] puts an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Insert as a new entry at the front.
    Prepend,
    /// Replace the entry at this index.
    At(usize),
}

impl Position {
    /// `-1` means a new entry; any other non-negative value is an index.
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            -1 => Some(Position::Prepend),
            i if i >= 0 => Some(Position::At(i as usize)),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct PlanEditor {
    plan: Plan,
    selected: BTreeMap<AssetType, BTreeSet<usize>>,
}

impl PlanEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn assets(&self, ty: AssetType) -> &[Asset] {
        self.plan.assets(ty)
    }

    /// Replace the whole plan. Clears the selection.
    pub fn set_assets(&mut self, plan: Plan) {
        self.plan = plan;
        self.selected.clear();
    }

    /// Upsert one entry and return the index it now lives at.
    ///
    /// Prepending shifts every index of that type, so the type's selection is
    /// cleared; replacing in place keeps it.
    pub fn set_asset_field(
        &mut self,
        ty: AssetType,
        position: Position,
        asset: Asset,
    ) -> Result<usize, AppError> {
        if asset.name.trim().is_empty() {
            return Err(AppError::Validation(format!("{} is required", ty.name_field())));
        }
        let list = self.plan.list_mut(ty);
        match position {
            Position::Prepend => {
                list.insert(0, asset);
                self.selected.remove(&ty);
                Ok(0)
            }
            Position::At(index) => {
                let len = list.len();
                let slot = list
                    .get_mut(index)
                    .ok_or_else(|| out_of_range(ty, index, len))?;
                *slot = asset;
                Ok(index)
            }
        }
    }

    pub fn remove_asset(&mut self, ty: AssetType, index: usize) -> Result<Asset, AppError> {
        let list = self.plan.list_mut(ty);
        if index >= list.len() {
            return Err(out_of_range(ty, index, list.len()));
        }
        let removed = list.remove(index);
        self.selected.remove(&ty);
        Ok(removed)
    }

    pub fn set_off_inventory(
        &mut self,
        ty: AssetType,
        index: usize,
        off_inventory: bool,
    ) -> Result<(), AppError> {
        let list = self.plan.list_mut(ty);
        let len = list.len();
        let asset = list.get_mut(index).ok_or_else(|| out_of_range(ty, index, len))?;
        asset.off_inventory = off_inventory;
        Ok(())
    }

    pub fn select_asset(
        &mut self,
        ty: AssetType,
        index: usize,
        selected: bool,
    ) -> Result<(), AppError> {
        let len = self.plan.assets(ty).len();
        if index >= len {
            return Err(out_of_range(ty, index, len));
        }
        let set = self.selected.entry(ty).or_default();
        if selected {
            set.insert(index);
        } else {
            set.remove(&index);
        }
        Ok(())
    }

    pub fn is_selected(&self, ty: AssetType, index: usize) -> bool {
        self.selected.get(&ty).is_some_and(|s| s.contains(&index))
    }

    pub fn selected_count(&self) -> usize {
        self.selected.values().map(BTreeSet::len).sum()
    }

    /// Remove every selected entry and return how many were removed.
    ///
    /// Indices are removed highest first so earlier removals never shift the
    /// positions of later ones.
    pub fn remove_selected(&mut self) -> usize {
        let mut removed = 0;
        for (ty, indices) in std::mem::take(&mut self.selected) {
            let mut indices: Vec<usize> = indices.into_iter().collect();
            indices.sort_unstable_by(|a, b| b.cmp(a));
            let list = self.plan.list_mut(ty);
            for index in indices {
                if index < list.len() {
                    list.remove(index);
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Overwrite the children of entries whose primary name appears in
    /// `generated`. Entries without a match are left alone. Returns the number
    /// of entries updated.
    pub fn merge_children(
        &mut self,
        ty: AssetType,
        generated: &BTreeMap<String, Vec<String>>,
    ) -> usize {
        if !ty.supports_ai() {
            return 0;
        }
        let mut updated = 0;
        for asset in self.plan.list_mut(ty).iter_mut() {
            if let Some(children) = generated.get(&asset.name) {
                asset.children = Some(children.clone());
                updated += 1;
            }
        }
        updated
    }
}

fn out_of_range(ty: AssetType, index: usize, len: usize) -> AppError {
    AppError::Validation(format!(
        "{} index {} out of range ({} entries)",
        ty, index, len
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn editor_with_buckets(names: &[&str]) -> PlanEditor {
        let mut editor = PlanEditor::new();
        let mut plan = Plan::default();
        plan.assets.insert(
            AssetType::S3Bucket,
            names.iter().map(|n| Asset::new(*n)).collect(),
        );
        editor.set_assets(plan);
        editor
    }

    fn names(editor: &PlanEditor, ty: AssetType) -> Vec<String> {
        editor.assets(ty).iter().map(|a| a.name.clone()).collect()
    }

    #[test]
    fn test_missing_types_filled_in() {
        let plan = Plan::from_wire(json!({
            "assets": {"S3Bucket": [{"bucket_name": "logs", "objects": ["a.txt"]}]}
        }))
        .unwrap();
        for ty in AssetType::ALL {
            assert!(plan.asset_types().any(|t| t == ty), "{} missing", ty);
        }
        assert_eq!(plan.assets(AssetType::S3Bucket)[0].children, Some(vec!["a.txt".into()]));
        assert!(plan.assets(AssetType::SQSQueue).is_empty());
    }

    #[test]
    fn test_unknown_asset_type_rejected() {
        let err = Plan::from_wire(json!({"LambdaFunction": []})).unwrap_err();
        assert!(matches!(err, AppError::InvalidResponse(_)));
    }

    #[test]
    fn test_entry_without_name_rejected() {
        let err = Plan::from_wire(json!({"SQSQueue": [{"off_inventory": true}]})).unwrap_err();
        assert!(err.to_string().contains("queue_name"));
    }

    #[test]
    fn test_wire_round_trip_keeps_extra_fields() {
        let raw = json!({"assets": {"SSMParameter": [
            {"ssm_parameter_name": "/prod/db", "off_inventory": true, "kms_key": "alias/x"}
        ]}});
        let plan = Plan::from_wire(raw).unwrap();
        let asset = &plan.assets(AssetType::SSMParameter)[0];
        assert!(asset.off_inventory);
        assert_eq!(asset.extra["kms_key"], "alias/x");

        let wire = plan.to_wire();
        assert_eq!(wire["assets"]["SSMParameter"][0]["ssm_parameter_name"], "/prod/db");
        assert_eq!(wire["assets"]["SSMParameter"][0]["kms_key"], "alias/x");
        assert_eq!(wire["assets"]["DynamoDBTable"], json!([]));
    }

    #[test]
    fn test_prepend_with_minus_one() {
        let mut editor = editor_with_buckets(&["a", "b"]);
        let pos = Position::from_index(-1).unwrap();
        let idx = editor.set_asset_field(AssetType::S3Bucket, pos, Asset::new("new")).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(names(&editor, AssetType::S3Bucket), ["new", "a", "b"]);
    }

    #[test]
    fn test_replace_in_place() {
        let mut editor = editor_with_buckets(&["a", "b", "c"]);
        editor
            .set_asset_field(AssetType::S3Bucket, Position::At(1), Asset::new("B"))
            .unwrap();
        assert_eq!(names(&editor, AssetType::S3Bucket), ["a", "B", "c"]);
    }

    #[test]
    fn test_replace_out_of_range() {
        let mut editor = editor_with_buckets(&["a"]);
        let err = editor
            .set_asset_field(AssetType::S3Bucket, Position::At(3), Asset::new("x"))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(Position::from_index(-2), None);
    }

    #[test]
    fn test_remove_selected_uses_original_positions() {
        let mut editor = editor_with_buckets(&["a", "b", "c"]);
        // Select in ascending order; removal must still hit the original slots.
        editor.select_asset(AssetType::S3Bucket, 0, true).unwrap();
        editor.select_asset(AssetType::S3Bucket, 2, true).unwrap();
        assert_eq!(editor.selected_count(), 2);

        assert_eq!(editor.remove_selected(), 2);
        assert_eq!(names(&editor, AssetType::S3Bucket), ["b"]);
        assert_eq!(editor.selected_count(), 0);
    }

    #[test]
    fn test_remove_selected_across_types() {
        let mut editor = editor_with_buckets(&["a", "b"]);
        editor
            .set_asset_field(AssetType::SQSQueue, Position::Prepend, Asset::new("q1"))
            .unwrap();
        editor.select_asset(AssetType::S3Bucket, 1, true).unwrap();
        editor.select_asset(AssetType::SQSQueue, 0, true).unwrap();
        editor.select_asset(AssetType::S3Bucket, 0, true).unwrap();
        editor.select_asset(AssetType::S3Bucket, 0, false).unwrap();

        assert_eq!(editor.remove_selected(), 2);
        assert_eq!(names(&editor, AssetType::S3Bucket), ["a"]);
        assert!(editor.assets(AssetType::SQSQueue).is_empty());
    }

    #[test]
    fn test_prepend_clears_selection_for_type() {
        let mut editor = editor_with_buckets(&["a", "b"]);
        editor.select_asset(AssetType::S3Bucket, 1, true).unwrap();
        editor
            .set_asset_field(AssetType::S3Bucket, Position::Prepend, Asset::new("z"))
            .unwrap();
        assert!(!editor.is_selected(AssetType::S3Bucket, 1));
    }

    #[test]
    fn test_remove_asset_clears_selection_for_type() {
        let mut editor = editor_with_buckets(&["a", "b", "c"]);
        editor
            .set_asset_field(AssetType::SQSQueue, Position::Prepend, Asset::new("q"))
            .unwrap();
        editor.select_asset(AssetType::S3Bucket, 2, true).unwrap();
        editor.select_asset(AssetType::SQSQueue, 0, true).unwrap();

        let removed = editor.remove_asset(AssetType::S3Bucket, 0).unwrap();
        assert_eq!(removed.name, "a");
        assert_eq!(names(&editor, AssetType::S3Bucket), vec!["b", "c"]);
        assert!(!editor.is_selected(AssetType::S3Bucket, 1));
        assert!(editor.is_selected(AssetType::SQSQueue, 0));
        assert_eq!(editor.selected_count(), 1);

        assert!(editor.remove_asset(AssetType::S3Bucket, 2).is_err());
        assert_eq!(names(&editor, AssetType::S3Bucket), vec!["b", "c"]);
    }

    #[test]
    fn test_merge_children_by_name() {
        let mut editor = editor_with_buckets(&["a", "b"]);
        let generated = BTreeMap::from([("a".to_string(), vec!["x".to_string(), "y".to_string()])]);
        assert_eq!(editor.merge_children(AssetType::S3Bucket, &generated), 1);

        let assets = editor.assets(AssetType::S3Bucket);
        assert_eq!(assets[0].children, Some(vec!["x".into(), "y".into()]));
        assert_eq!(assets[1], Asset::new("b"));
    }

    #[test]
    fn test_merge_children_ignored_for_non_ai_type() {
        let mut editor = PlanEditor::new();
        editor
            .set_asset_field(AssetType::SQSQueue, Position::Prepend, Asset::new("q"))
            .unwrap();
        let generated = BTreeMap::from([("q".to_string(), vec!["x".to_string()])]);
        assert_eq!(editor.merge_children(AssetType::SQSQueue, &generated), 0);
    }

    #[test]
    fn test_off_inventory_toggle() {
        let mut editor = editor_with_buckets(&["a"]);
        editor.set_off_inventory(AssetType::S3Bucket, 0, true).unwrap();
        assert!(editor.assets(AssetType::S3Bucket)[0].off_inventory);
        assert!(editor.set_off_inventory(AssetType::S3Bucket, 5, true).is_err());
    }
}
