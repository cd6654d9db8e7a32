// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Owner references are plain data (kind + uid); the store uses them for cascading
//! deletes, so controllers never track their children themselves.

use crate::client::ObjectResource;
use crate::error::ClientError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::ResourceExt;

/// Controller back-reference to attach to objects created on behalf of `resource`.
pub fn create_owner_reference<K: ObjectResource>(resource: &K) -> Result<OwnerReference, ClientError> {
    let name = resource
        .meta()
        .name
        .clone()
        .ok_or_else(|| ClientError::Invalid("owner has no metadata.name".to_string()))?;
    let uid = resource.uid().ok_or_else(|| {
        ClientError::Invalid(format!("owner {} has no uid yet", name))
    })?;

    Ok(OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name,
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Whether `meta` carries a controller reference to `owner`, compared by uid.
pub fn is_controlled_by<K: ObjectResource>(meta: &ObjectMeta, owner: &K) -> bool {
    let Some(uid) = owner.uid() else {
        return false;
    };
    meta.owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.uid == uid && r.controller == Some(true)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;

    fn make_owner(uid: Option<&str>) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("owner".to_string()),
                namespace: Some("default".to_string()),
                uid: uid.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_owner_reference_fields() {
        let owner = make_owner(Some("uid-1"));
        let reference = create_owner_reference(&owner).unwrap();

        assert_eq!(reference.api_version, "v1");
        assert_eq!(reference.kind, "ConfigMap");
        assert_eq!(reference.name, "owner");
        assert_eq!(reference.uid, "uid-1");
        assert_eq!(reference.controller, Some(true));
        assert_eq!(reference.block_owner_deletion, Some(true));
    }

    #[test]
    fn test_owner_reference_requires_uid() {
        assert!(create_owner_reference(&make_owner(None)).is_err());
    }

    #[test]
    fn test_is_controlled_by() {
        let owner = make_owner(Some("uid-1"));
        let child = ObjectMeta {
            owner_references: Some(vec![create_owner_reference(&owner).unwrap()]),
            ..Default::default()
        };

        assert!(is_controlled_by(&child, &owner));
        assert!(!is_controlled_by(&child, &make_owner(Some("uid-2"))));
        assert!(!is_controlled_by(&ObjectMeta::default(), &owner));
    }
}
