//! 解決処理のプロパティテスト
//!
//! - 同じ入力からは常に同じビルド単位が得られる
//! - タグ式は表示してから読み直しても同じ書き換えになる
//! - `+` を含まない書き換え列は、合成した1つの書き換えと等しい

use dockyard_core::{
    Module, ModuleConfig, RegistryUpdate, ResolveRequest, Tag, TagMutator, TagPatch,
    VariantSelection, apply_mutators, resolve,
};
use proptest::prelude::*;
use std::path::Path;

fn arb_name() -> impl Strategy<Value = String> {
    prop::string::string_regex(r"[a-z][a-z0-9_.-]{0,8}").unwrap()
}

fn arb_registry() -> impl Strategy<Value = String> {
    prop_oneof![
        (arb_label(), arb_label()).prop_map(|(a, b)| format!("{}.{}", a, b)),
        (arb_label(), 1u16..65535).prop_map(|(a, port)| format!("{}:{}", a, port)),
    ]
}

fn arb_label() -> impl Strategy<Value = String> {
    prop::string::string_regex(r"[a-z][a-z0-9-]{0,6}").unwrap()
}

/// コマンドラインで書けるタグ式
fn arb_mutator_token() -> impl Strategy<Value = String> {
    prop_oneof![
        arb_name().prop_map(|t| format!(":{}", t)),
        arb_name().prop_map(|i| format!("/{}", i)),
        (arb_name(), arb_name()).prop_map(|(i, t)| format!("/{}:{}", i, t)),
        arb_label().prop_map(|n| format!("{}/", n)),
        (arb_label(), arb_name()).prop_map(|(n, i)| format!("{}/{}", n, i)),
        (arb_label(), arb_name(), arb_name()).prop_map(|(n, i, t)| format!("{}/{}:{}", n, i, t)),
        arb_registry(),
        (arb_registry(), arb_name()).prop_map(|(r, n)| format!("{}/{}", r, n)),
        (arb_registry(), arb_name(), arb_name()).prop_map(|(r, n, i)| format!("{}/{}/{}", r, n, i)),
        (arb_registry(), arb_name(), arb_name(), arb_name())
            .prop_map(|(r, n, i, t)| format!("{}/{}/{}:{}", r, n, i, t)),
    ]
}

fn arb_patch() -> impl Strategy<Value = TagPatch> {
    arb_mutator_token().prop_map(|token| match TagMutator::parse(&token) {
        Ok(TagMutator::Patch(patch)) => patch,
        other => panic!("{} did not parse as a patch: {:?}", token, other),
    })
}

fn sample_module() -> Module {
    let config = ModuleConfig::from_yaml(
        "repository: r/img\nvariants:\n  - tag: master\n    aliases: [latest]\n  - tag: stable\n",
        Path::new("build.yml"),
    )
    .unwrap();
    Module::with_config("m", Some(config))
}

proptest! {
    #[test]
    fn mutator_display_round_trip(token in arb_mutator_token()) {
        let mutator = TagMutator::parse(&token).unwrap();
        let reparsed = TagMutator::parse(&mutator.to_string()).unwrap();
        prop_assert_eq!(reparsed, mutator);
    }

    #[test]
    fn sequential_patches_equal_composed_patch(patches in prop::collection::vec(arb_patch(), 1..5)) {
        let base = Tag::parse("registry.x.com/r/img:master").unwrap();

        let sequential = patches.iter().fold(base.clone(), |tag, patch| tag.apply(patch));
        let composed = patches[1..]
            .iter()
            .fold(patches[0].clone(), |acc, patch| acc.then(patch));

        prop_assert_eq!(base.apply(&composed), sequential.clone());

        let mutators: Vec<TagMutator> = patches.into_iter().map(TagMutator::Patch).collect();
        prop_assert_eq!(apply_mutators(&[base], &mutators), vec![sequential]);
    }

    #[test]
    fn append_keeps_earlier_destinations(
        before in prop::collection::vec(arb_patch(), 0..3),
        after in prop::collection::vec(arb_patch(), 0..3),
    ) {
        let base = vec![Tag::parse("r/img:master").unwrap()];
        let mut mutators: Vec<TagMutator> = before.iter().cloned().map(TagMutator::Patch).collect();
        mutators.push(TagMutator::Append);
        mutators.extend(after.iter().cloned().map(TagMutator::Patch));

        let tags = apply_mutators(&base, &mutators);
        let first = apply_mutators(&base, &before.into_iter().map(TagMutator::Patch).collect::<Vec<_>>());
        let second = apply_mutators(&base, &after.into_iter().map(TagMutator::Patch).collect::<Vec<_>>());

        for tag in first.iter().chain(second.iter()) {
            prop_assert!(tags.contains(tag));
        }
        prop_assert!(tags.len() <= first.len() + second.len());
    }

    #[test]
    fn resolve_is_deterministic(
        tokens in prop::collection::vec(
            prop_oneof![arb_mutator_token(), Just("+".to_string())],
            0..5,
        ),
        all in any::<bool>(),
    ) {
        let mutators: Vec<TagMutator> = tokens.iter().map(|t| TagMutator::parse(t).unwrap()).collect();
        let request = ResolveRequest {
            variants: if all {
                VariantSelection::All
            } else {
                VariantSelection::Named(["latest".to_string()].into())
            },
            mutators,
            ..Default::default()
        };
        let modules = [sample_module()];

        let first = resolve(&modules, &request);
        let second = resolve(&modules, &request);
        prop_assert_eq!(format!("{:?}", first), format!("{:?}", second));
    }
}

#[test]
fn registry_is_preserved_unless_cleared() {
    let base = Tag::parse("registry.x.com/r/img:master").unwrap();
    let patch = TagPatch {
        namespace: Some("team".into()),
        ..Default::default()
    };
    assert_eq!(patch.registry, RegistryUpdate::Keep);
    assert_eq!(base.apply(&patch).full(), "registry.x.com/team/img:master");
}
