// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Trees used to specialize a parsed struct or packet into its most
//! specific derived declaration.
//!
//! Children are tried in declaration order and the first child whose
//! validator accepts the bytes is selected, without backtracking.
//! Siblings that cannot be told apart by their constraints or size are
//! reported as warnings, since only the first declared can ever be
//! selected for a given input.

use codespan_reporting::diagnostic::Diagnostic;
use serde::Serialize;

use crate::analyzer::{Diagnostics, ErrorCode};
use crate::declarations::Declarations;
use crate::typedef::TypeKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchNode {
    pub id: String,
    pub children: Vec<DispatchNode>,
}

fn build_node(decls: &Declarations, key: TypeKey) -> DispatchNode {
    DispatchNode {
        id: decls.get(key).name.clone(),
        children: decls.iter_children(key).map(|child| build_node(decls, child)).collect(),
    }
}

/// Return the dispatch tree rooted at the selected declaration, or
/// `None` if the declaration has no children.
pub fn dispatch_tree(decls: &Declarations, key: TypeKey) -> Option<DispatchNode> {
    decls.iter_children(key).next()?;
    let tree = build_node(decls, key);
    tracing::debug!(root = tree.id.as_str(), children = tree.children.len(), "built dispatch tree");
    Some(tree)
}

/// Group struct declarations by their root declaration. Only roots with
/// at least one child are returned.
pub fn struct_forest(decls: &Declarations) -> Vec<DispatchNode> {
    decls
        .types()
        .filter(|key| decls.parent_def(*key).is_some() && decls.get_parent(*key).is_none())
        .filter_map(|key| dispatch_tree(decls, key))
        .collect()
}

/// Report sibling declarations with identical constraints and sizes.
pub(crate) fn check_indistinguishable_children(decls: &Declarations) -> Diagnostics {
    let mut diagnostics = Diagnostics::default();
    for key in decls.keys() {
        let children: Vec<TypeKey> = decls.iter_children(key).collect();
        for (index, first) in children.iter().enumerate() {
            for second in &children[index + 1..] {
                let (Some(first_def), Some(second_def)) =
                    (decls.parent_def(*first), decls.parent_def(*second))
                else {
                    continue;
                };
                if first_def.constraints == second_def.constraints
                    && decls.size_of(*first, false) == decls.size_of(*second, false)
                {
                    diagnostics.push(
                        Diagnostic::warning()
                            .with_code(ErrorCode::IndistinguishableChildren)
                            .with_message(format!(
                                "{} and {} cannot be disambiguated",
                                decls.get(*first).name,
                                decls.get(*second).name
                            ))
                            .with_notes(vec![format!(
                                "note: `{}` is declared first and is always selected",
                                decls.get(*first).name
                            )]),
                    );
                }
            }
        }
    }
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::declarations;
    use serde_json::json;

    #[test]
    fn test_struct_forest() {
        let decls = declarations(
            "little_endian",
            json!([
                { "kind": "struct_declaration", "id": "Parent", "fields": [
                    { "kind": "scalar_field", "id": "kind", "width": 8 },
                    { "kind": "body_field" }
                ] },
                { "kind": "struct_declaration", "id": "A", "parent_id": "Parent",
                  "constraints": [ { "id": "kind", "value": 1 } ],
                  "fields": [ { "kind": "scalar_field", "id": "a", "width": 8 } ] },
                { "kind": "struct_declaration", "id": "B", "parent_id": "Parent",
                  "constraints": [ { "id": "kind", "value": 2 } ],
                  "fields": [ { "kind": "scalar_field", "id": "b", "width": 16 } ] },
                { "kind": "struct_declaration", "id": "Leaf", "fields": [
                    { "kind": "scalar_field", "id": "x", "width": 8 }
                ] }
            ]),
        );
        let forest = struct_forest(&decls);
        assert_eq!(
            forest,
            vec![DispatchNode {
                id: "Parent".to_owned(),
                children: vec![
                    DispatchNode { id: "A".to_owned(), children: vec![] },
                    DispatchNode { id: "B".to_owned(), children: vec![] },
                ],
            }]
        );
        assert!(dispatch_tree(&decls, decls.lookup("Leaf").unwrap()).is_none());
        assert!(decls.warnings().is_empty());
    }

    #[test]
    fn test_indistinguishable_children() {
        let decls = declarations(
            "little_endian",
            json!([
                { "kind": "packet_declaration", "id": "Parent", "fields": [
                    { "kind": "scalar_field", "id": "kind", "width": 8 },
                    { "kind": "payload_field" }
                ] },
                { "kind": "packet_declaration", "id": "A", "parent_id": "Parent",
                  "constraints": [ { "id": "kind", "value": 1 } ],
                  "fields": [ { "kind": "scalar_field", "id": "a", "width": 8 } ] },
                { "kind": "packet_declaration", "id": "B", "parent_id": "Parent",
                  "constraints": [ { "id": "kind", "value": 1 } ],
                  "fields": [ { "kind": "scalar_field", "id": "b", "width": 8 } ] }
            ]),
        );
        let warnings = decls.warnings();
        assert_eq!(warnings.diagnostics.len(), 1);
        assert_eq!(
            warnings.diagnostics[0].code,
            Some(ErrorCode::IndistinguishableChildren.into())
        );
        assert_eq!(warnings.diagnostics[0].message, "A and B cannot be disambiguated");
    }
}
