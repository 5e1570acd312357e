use lattice_core::{ViewBuilder, ViewState};
use lattice_tests::MockGrid;

fn k(s: &str) -> String { s.to_string() }

#[tokio::test]
async fn caching_values_view_follows_remote_changes() -> anyhow::Result<()> {
    let grid = MockGrid::<String, String>::new("dist-basic");
    grid.server_put(k("key0"), k("val0"));

    let view = ViewBuilder::new(grid.handle()).values().build().await?;
    assert_eq!(view.state(), ViewState::Synchronized);
    assert_eq!(view.get(&k("key0")).await?, Some(k("val0")));

    // writes through the view round-trip via the event stream
    view.put(k("key1"), k("val1")).await?;
    view.put(k("key2"), k("val2")).await?;
    view.put(k("key3"), k("val3")).await?;
    view.put(k("key3"), k("val2")).await?;
    view.remove(&k("key2")).await?;

    assert_eq!(view.get(&k("key1")).await?, Some(k("val1")));
    assert_eq!(view.get(&k("key2")).await?, None);
    assert_eq!(view.get(&k("key3")).await?, Some(k("val2")));
    assert_eq!(view.len().await?, 3);
    assert_eq!(view.keys().await?, vec![k("key0"), k("key1"), k("key3")]);

    // a clear on the backing cache empties the view through the remove stream
    grid.server_clear();
    assert_eq!(view.len().await?, 0);
    assert!(view.is_empty().await?);
    Ok(())
}

#[tokio::test]
async fn key_only_view_tracks_membership_and_delegates_reads() -> anyhow::Result<()> {
    let grid = MockGrid::<String, String>::new("dist-keys");
    grid.server_put(k("key0"), k("val0"));

    let view = ViewBuilder::new(grid.handle()).keys().build().await?;
    assert!(!view.is_cache_values());
    assert!(view.contains_key(&k("key0")).await?);

    // reads for keys in the view are served by the backing cache
    assert_eq!(view.get(&k("key0")).await?, Some(k("val0")));
    assert_eq!(view.get(&k("key1")).await?, None);

    grid.server_put(k("key1"), k("val1"));
    grid.server_put(k("key2"), k("val2"));
    grid.server_put(k("key3"), k("val3"));
    grid.server_put(k("key3"), k("val2"));
    grid.server_remove(&k("key2"));

    assert_eq!(view.get(&k("key1")).await?, Some(k("val1")));
    assert_eq!(view.get(&k("key2")).await?, None);
    assert_eq!(view.get(&k("key3")).await?, Some(k("val2")));
    assert_eq!(view.len().await?, 3);

    // entries materialize values from the backing cache on demand
    let entries = view.entries().await?;
    assert!(entries.contains(&(k("key3"), k("val2"))));

    grid.server_clear();
    assert_eq!(view.len().await?, 0);
    Ok(())
}

#[tokio::test]
async fn bulk_reads_follow_the_mode() -> anyhow::Result<()> {
    let grid = MockGrid::<String, i64>::new("dist-bulk");
    for (key, value) in [("a", 1i64), ("b", 2), ("c", 3)] {
        grid.server_put(k(key), value);
    }

    let view = ViewBuilder::new(grid.handle()).values().build().await?;
    let keys = vec![k("a"), k("c"), k("zz")];
    assert_eq!(view.get_all(&keys).await?, vec![(k("a"), 1), (k("c"), 3)]);

    let view = ViewBuilder::new(grid.handle()).keys().build().await?;
    assert_eq!(view.get_all(&keys).await?, vec![(k("a"), 1), (k("c"), 3)]);
    Ok(())
}

#[tokio::test]
async fn key_only_membership_gates_delegation() -> anyhow::Result<()> {
    let grid = MockGrid::<String, i64>::new("dist-keys-membership");
    grid.server_put(k("in"), 400);
    grid.server_put(k("out"), 100);

    let view = ViewBuilder::new(grid.handle()).filter(lattice_tests::over(300)).keys().build().await?;
    assert_eq!(view.get(&k("in")).await?, Some(400));

    // present on the cluster but outside the view: absent, without a fetch
    assert_eq!(view.get(&k("out")).await?, None);
    assert_eq!(view.get_all(&[k("in"), k("out")]).await?, vec![(k("in"), 400)]);
    Ok(())
}

#[tokio::test]
async fn view_clear_removes_only_view_entries() -> anyhow::Result<()> {
    let grid = MockGrid::<String, i64>::new("dist-clear");
    grid.server_put(k("in"), 500);
    grid.server_put(k("out"), 100);

    let over_300 = lattice_tests::over(300);
    let view = ViewBuilder::new(grid.handle()).filter(over_300).values().build().await?;
    assert_eq!(view.len().await?, 1);

    view.clear().await?;
    assert_eq!(view.len().await?, 0);
    // the entry outside the view is untouched
    assert_eq!(grid.contents(), vec![(k("out"), 100)]);
    Ok(())
}
