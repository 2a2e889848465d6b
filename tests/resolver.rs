mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{FakeProvider, FakeZenTao};
use zentao_sso::store::file::FileBindingStore;
use zentao_sso::{
    AccessToken, AccountName, AccountResolver, AccountStrategy, BindingStore, ExternalId,
    ExternalIdentity, ProjectMembership, ResolveError, ResolverPolicy,
};

struct Fixture {
    resolver: AccountResolver,
    zentao: Arc<FakeZenTao>,
    bindings: Arc<FileBindingStore>,
    _dir: tempfile::TempDir,
}

fn fixture(policy: ResolverPolicy, zentao: FakeZenTao) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let zentao = Arc::new(zentao);
    let bindings = Arc::new(FileBindingStore::in_dir(dir.path()));
    Fixture {
        resolver: AccountResolver::new(policy, zentao.clone(), bindings.clone()),
        zentao,
        bindings,
        _dir: dir,
    }
}

fn zhangsan() -> ExternalIdentity {
    ExternalIdentity::new("u001").with_display_name("张三")
}

async fn binding(fx: &Fixture, id: &str) -> Option<AccountName> {
    fx.bindings.get(&ExternalId::from(id)).await.unwrap()
}

#[tokio::test]
async fn static_mapping_wins_over_binding() {
    let policy = ResolverPolicy::default().with_static_accounts(HashMap::from([(
        "u001".to_string(),
        "zhangsan".to_string(),
    )]));
    let fx = fixture(policy, FakeZenTao::new("http://zentao.test/").with_account("zhangsan", "张三"));
    fx.bindings
        .put(&ExternalId::from("u001"), &AccountName::from("someone_else"))
        .await
        .unwrap();

    let account = fx.resolver.resolve(&zhangsan()).await.unwrap();
    assert_eq!(account.as_str(), "zhangsan");
    assert_eq!(fx.zentao.creates(), 0);
}

#[tokio::test]
async fn existing_binding_is_reused() {
    let fx = fixture(
        ResolverPolicy::default().with_bind_by_display_name(true),
        FakeZenTao::new("http://zentao.test/")
            .with_account("zs", "张三 (旧)")
            .with_account("zhangsan", "张三"),
    );
    fx.bindings
        .put(&ExternalId::from("u001"), &AccountName::from("zs"))
        .await
        .unwrap();

    // A display-name search would pick `zhangsan`.
    let account = fx.resolver.resolve(&zhangsan()).await.unwrap();
    assert_eq!(account.as_str(), "zs");
    assert_eq!(fx.zentao.searches(), 0);
    assert_eq!(fx.zentao.creates(), 0);
}

#[tokio::test]
async fn unique_display_name_match_is_adopted_and_bound() {
    let fx = fixture(
        ResolverPolicy::default().with_bind_by_display_name(true),
        FakeZenTao::new("http://zentao.test/").with_account("zhangsan", "张三"),
    );

    let account = fx.resolver.resolve(&zhangsan()).await.unwrap();
    assert_eq!(account.as_str(), "zhangsan");
    assert_eq!(fx.zentao.searches(), 1);
    assert_eq!(binding(&fx, "u001").await.unwrap().as_str(), "zhangsan");
    assert_eq!(fx.zentao.creates(), 0);
}

#[tokio::test]
async fn ambiguous_display_name_falls_through_to_strategy() {
    let fx = fixture(
        ResolverPolicy::default().with_bind_by_display_name(true),
        FakeZenTao::new("http://zentao.test/")
            .with_account("zhangsan", "张三")
            .with_account("zhangsan2", "张三"),
    );

    let account = fx.resolver.resolve(&zhangsan()).await.unwrap();
    assert_eq!(account.as_str(), "u001");
    assert_eq!(fx.zentao.creates(), 1);
    assert_eq!(binding(&fx, "u001").await.unwrap().as_str(), "u001");
}

#[tokio::test]
async fn missing_display_name_search_is_not_an_error() {
    let fx = fixture(
        ResolverPolicy::default().with_bind_by_display_name(true),
        FakeZenTao::new("http://zentao.test/")
            .with_account("zhangsan", "张三")
            .without_search(),
    );

    let account = fx.resolver.resolve(&zhangsan()).await.unwrap();
    assert_eq!(account.as_str(), "u001");
}

#[tokio::test]
async fn display_name_strategy_normalizes_or_falls_back() {
    let fx = fixture(
        ResolverPolicy::default().with_strategy(AccountStrategy::DisplayName),
        FakeZenTao::new("http://zentao.test/"),
    );

    let latin = ExternalIdentity::new("u002").with_display_name("Li Si (QA)");
    assert_eq!(fx.resolver.resolve(&latin).await.unwrap().as_str(), "lisiqa");

    let han = ExternalIdentity::new("u003").with_display_name("王五");
    assert_eq!(fx.resolver.resolve(&han).await.unwrap().as_str(), "u003");

    let created = fx.zentao.account("lisiqa").unwrap();
    assert_eq!(created.display_name, "Li Si (QA)");
    assert_eq!(created.role, "pm");
    assert_eq!(created.visions, "rnd");
}

#[tokio::test]
async fn second_login_does_not_create_again() {
    let fx = fixture(ResolverPolicy::default(), FakeZenTao::new("http://zentao.test/"));

    let first = fx.resolver.resolve(&zhangsan()).await.unwrap();
    let second = fx.resolver.resolve(&zhangsan()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(fx.zentao.creates(), 1);
    assert_eq!(fx.zentao.account_count(), 1);
}

#[tokio::test]
async fn auto_create_disabled_denies_unbound_identities() {
    let fx = fixture(
        ResolverPolicy::default().with_allow_auto_create(false),
        FakeZenTao::new("http://zentao.test/"),
    );

    let err = fx.resolver.resolve(&zhangsan()).await.unwrap_err();
    assert!(matches!(err, ResolveError::Permission { ref external_id } if external_id.as_str() == "u001"));
    assert_eq!(fx.zentao.creates(), 0);
    assert_eq!(fx.zentao.account_count(), 0);
    assert!(binding(&fx, "u001").await.is_none());
}

#[tokio::test]
async fn auto_create_disabled_still_recreates_bound_accounts() {
    let fx = fixture(
        ResolverPolicy::default().with_allow_auto_create(false),
        FakeZenTao::new("http://zentao.test/"),
    );
    fx.bindings
        .put(&ExternalId::from("u001"), &AccountName::from("zhangsan"))
        .await
        .unwrap();

    let account = fx.resolver.resolve(&zhangsan()).await.unwrap();
    assert_eq!(account.as_str(), "zhangsan");
    assert_eq!(fx.zentao.creates(), 1);
}

#[tokio::test]
async fn department_is_mapped_with_fallback() {
    let policy = ResolverPolicy::default()
        .with_department_map(HashMap::from([("100".to_string(), 7)]))
        .with_default_department(2);
    let fx = fixture(policy, FakeZenTao::new("http://zentao.test/"));

    fx.resolver
        .resolve(&ExternalIdentity::new("u010").with_department("100"))
        .await
        .unwrap();
    fx.resolver
        .resolve(&ExternalIdentity::new("u011").with_department("999"))
        .await
        .unwrap();

    assert_eq!(fx.zentao.account("u010").unwrap().department, 7);
    assert_eq!(fx.zentao.account("u011").unwrap().department, 2);
    // No display name: the account name stands in.
    assert_eq!(fx.zentao.account("u010").unwrap().display_name, "u010");
}

#[tokio::test]
async fn membership_failures_do_not_fail_login() {
    let policy = ResolverPolicy::default().with_project(Some(ProjectMembership {
        project_id: 3,
        role: "dev".into(),
    }));
    let fx = fixture(
        policy,
        FakeZenTao::new("http://zentao.test/").with_failing_memberships(),
    );

    let account = fx.resolver.resolve(&zhangsan()).await.unwrap();
    assert_eq!(account.as_str(), "u001");
    assert_eq!(fx.zentao.group_grants.load(Ordering::SeqCst), 1);
    assert_eq!(fx.zentao.project_grants.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn directory_sync_counts_resolved_users() {
    let fx = fixture(
        ResolverPolicy::default().with_allow_auto_create(false),
        FakeZenTao::new("http://zentao.test/").with_account("u100", "Existing"),
    );
    let provider = FakeProvider::default().with_directory(vec![
        ExternalIdentity::new("u100"),
        ExternalIdentity::new("u101"),
    ]);

    let synced = fx
        .resolver
        .sync_directory(&provider, &AccessToken("token-directory".into()))
        .await
        .unwrap();
    assert_eq!(synced, 1);
    assert_eq!(fx.zentao.creates(), 0);
}
