//! End-to-end routing scenarios: registry + lake in, deterministic plan out.

use std::collections::BTreeMap;

use chrono::Utc;
use tempfile::TempDir;

use viewhouse_catalog::{compute_fingerprint, Health, MeasureExpr, Registry, ViewDescriptor};
use viewhouse_core::plan::{ColumnExpr, MatchType, PlanSource};
use viewhouse_core::query::{AggFunc, Predicate, ScalarValue};
use viewhouse_core::{Grain, QuerySpec, RuntimeConfig};
use viewhouse_lake::Lake;
use viewhouse_planner::{PlanOptions, Planner};

fn impression_filter() -> Predicate {
    Predicate::eq("type", ScalarValue::Text("impression".to_string()))
}

fn descriptor(
    name: &str,
    grain: Grain,
    dims: &[&str],
    filters: Vec<Predicate>,
    measures: Vec<(&str, MeasureExpr)>,
    byte_size: u64,
) -> ViewDescriptor {
    let dimensions: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
    let measures: BTreeMap<String, MeasureExpr> = measures
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    let fingerprint = compute_fingerprint(grain, &dimensions, &filters, &measures);
    ViewDescriptor {
        name: name.to_string(),
        grain,
        dimensions,
        filters,
        measures,
        schema_fingerprint: fingerprint,
        files: vec![],
        row_count: 1000,
        byte_size,
        built_at: Utc::now(),
        source_watermark: None,
        health: Health::Healthy,
    }
}

struct Fixture {
    _tmp: TempDir,
    lake: Lake,
    registry: Registry,
    planner: Planner,
}

fn fixture(days: &[&str]) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let events = tmp.path().join("lake/events");
    std::fs::create_dir_all(&events).unwrap();
    for day in days {
        std::fs::create_dir(events.join(format!("day={day}"))).unwrap();
    }
    let lake = Lake::open(tmp.path().join("lake")).unwrap();
    let planner = Planner::new(tmp.path().join("mvs"), &RuntimeConfig::default());
    Fixture {
        _tmp: tmp,
        lake,
        registry: Registry::new(),
        planner,
    }
}

fn query(raw: &str) -> QuerySpec {
    QuerySpec::from_json(raw).unwrap()
}

#[test]
fn daily_revenue_by_country_routes_to_exact_view() {
    let fx = fixture(&["2025-09-10", "2025-09-11", "2025-09-12", "2025-09-13"]);
    fx.registry
        .register(descriptor(
            "mv_day_country_impr",
            Grain::Day,
            &["country"],
            vec![impression_filter()],
            vec![("sum_bid", MeasureExpr::plain(AggFunc::Sum, Some("bid_price")))],
            10_000,
        ))
        .unwrap();

    let q = query(
        r#"{
            "from": "events",
            "select": ["country", {"SUM": "bid_price"}],
            "where": [
                {"col": "type", "op": "eq", "val": "impression"},
                {"col": "day", "op": "between", "val": ["2025-09-10", "2025-09-12"]}
            ],
            "group_by": ["country"],
            "order_by": [{"col": "country", "dir": "asc"}]
        }"#,
    );

    let routing = fx.planner.plan(&q, &fx.registry.snapshot(), &fx.lake).unwrap();
    let plan = routing.plan;
    assert_eq!(
        plan.source,
        PlanSource::View {
            name: "mv_day_country_impr".to_string()
        }
    );
    // Grain covers (day view, all-time+day-filtered query regroups), dims
    // exact, filter matched, measures available.
    assert!(plan.score >= 80, "score was {}", plan.score);
    assert_eq!(plan.match_type, MatchType::Partial);
    // The type filter was absorbed at build time; day stays residual.
    assert_eq!(plan.residual_filters.len(), 1);
    assert_eq!(plan.residual_filters[0].col, "day");
}

#[test]
fn single_day_hour_query_prefers_hour_view_then_pruned_base() {
    let q = query(
        r#"{
            "from": "events",
            "select": ["hour", {"SUM": "bid_price"}],
            "where": [
                {"col": "type", "op": "eq", "val": "impression"},
                {"col": "day", "op": "eq", "val": "2024-11-11"},
                {"col": "country", "op": "eq", "val": "JP"}
            ],
            "group_by": ["hour"]
        }"#,
    );

    // Without a view: base scan pruned to exactly one partition.
    let fx = fixture(&["2024-11-10", "2024-11-11", "2024-11-12"]);
    let routing = fx.planner.plan(&q, &fx.registry.snapshot(), &fx.lake).unwrap();
    assert_eq!(routing.plan.source, PlanSource::Base);
    assert_eq!(routing.plan.partition_days, vec!["2024-11-11".to_string()]);
    assert_eq!(routing.plan.scan_globs.len(), 1);
    // Narrow single-day window earns the pruning bonus.
    assert_eq!(routing.base_score, 85);

    // With an hour-grain view: the view wins.
    fx.registry
        .register(descriptor(
            "mv_hour_country_impr",
            Grain::Hour,
            &["country"],
            vec![impression_filter()],
            vec![("sum_bid", MeasureExpr::plain(AggFunc::Sum, Some("bid_price")))],
            5_000,
        ))
        .unwrap();
    let routing = fx.planner.plan(&q, &fx.registry.snapshot(), &fx.lake).unwrap();
    assert_eq!(
        routing.plan.source,
        PlanSource::View {
            name: "mv_hour_country_impr".to_string()
        }
    );
    // Grain exact + dims superset + filter + measures ties the narrow base
    // score; the pre-aggregated view wins the tie.
    assert_eq!(routing.plan.score, 85);
}

#[test]
fn all_time_counts_route_to_exact_view_at_score_80() {
    let fx = fixture(&["2025-01-01"]);
    fx.registry
        .register(descriptor(
            "mv_adv_type_counts",
            Grain::AllTime,
            &["advertiser_id", "type"],
            vec![],
            vec![("cnt", MeasureExpr::plain(AggFunc::Count, None))],
            2_000,
        ))
        .unwrap();

    let q = query(
        r#"{
            "from": "events",
            "select": ["advertiser_id", "type", {"COUNT": "*"}],
            "group_by": ["advertiser_id", "type"]
        }"#,
    );
    let routing = fx.planner.plan(&q, &fx.registry.snapshot(), &fx.lake).unwrap();
    assert_eq!(
        routing.plan.source,
        PlanSource::View {
            name: "mv_adv_type_counts".to_string()
        }
    );
    assert_eq!(routing.plan.match_type, MatchType::Exact);
    // 30 grain + 30 dims + 20 measures, no filters anywhere.
    assert_eq!(routing.plan.score, 80);
    // Exact match: stored counts pass through without regrouping.
    assert!(routing.plan.group_exprs.is_empty());
}

#[test]
fn day_rollup_reaggregates_finer_hour_view() {
    let fx = fixture(&["2025-01-01"]);
    fx.registry
        .register(descriptor(
            "mv_hour_wide",
            Grain::Hour,
            &[],
            vec![impression_filter()],
            vec![("sum_bid", MeasureExpr::plain(AggFunc::Sum, Some("bid_price")))],
            8_000,
        ))
        .unwrap();

    let q = query(
        r#"{
            "from": "events",
            "select": ["day", {"SUM": "bid_price"}],
            "where": [{"col": "type", "op": "eq", "val": "impression"}],
            "group_by": ["day"]
        }"#,
    );
    let routing = fx.planner.plan(&q, &fx.registry.snapshot(), &fx.lake).unwrap();
    let plan = routing.plan;
    assert_eq!(plan.match_type, MatchType::Partial);
    assert_eq!(
        plan.source,
        PlanSource::View {
            name: "mv_hour_wide".to_string()
        }
    );
    // Partial sums combine with SUM under the day regroup.
    assert!(plan
        .projection
        .iter()
        .any(|p| matches!(&p.expr, ColumnExpr::Combine { func: AggFunc::Sum, measure } if measure == "sum_bid")));
    assert_eq!(
        plan.group_exprs,
        vec![ColumnExpr::Column {
            name: "day".to_string()
        }]
    );
}

#[test]
fn user_level_ad_hoc_query_samples_the_base() {
    let fx = fixture(&["2025-01-01"]);
    let q = query(
        r#"{
            "from": "events",
            "select": ["user_id", {"COUNT": "*"}],
            "group_by": ["user_id"]
        }"#,
    );
    let routing = fx.planner.plan(&q, &fx.registry.snapshot(), &fx.lake).unwrap();
    assert_eq!(routing.plan.match_type, MatchType::Sampled);
    assert_eq!(routing.plan.sampling_rate, Some(0.10));
    assert!(routing.plan.is_approximate());
}

#[test]
fn quarantined_view_is_bypassed() {
    let fx = fixture(&["2025-01-01"]);
    fx.registry
        .register(descriptor(
            "mv_day_country_impr",
            Grain::Day,
            &["country"],
            vec![impression_filter()],
            vec![("sum_bid", MeasureExpr::plain(AggFunc::Sum, Some("bid_price")))],
            10_000,
        ))
        .unwrap();

    let q = query(
        r#"{
            "from": "events",
            "select": ["day", "country", {"SUM": "bid_price"}],
            "where": [{"col": "type", "op": "eq", "val": "impression"}],
            "group_by": ["day", "country"]
        }"#,
    );

    let before = fx.planner.plan(&q, &fx.registry.snapshot(), &fx.lake).unwrap();
    assert!(matches!(before.plan.source, PlanSource::View { .. }));

    fx.registry
        .mark("mv_day_country_impr", Health::Quarantined)
        .unwrap();
    let after = fx.planner.plan(&q, &fx.registry.snapshot(), &fx.lake).unwrap();
    assert_eq!(after.plan.source, PlanSource::Base);
    assert!(after.candidates.is_empty());
}

#[test]
fn avg_only_view_is_ineligible_for_reaggregation() {
    let fx = fixture(&["2025-01-01"]);
    let purchase = Predicate::eq("type", ScalarValue::Text("purchase".to_string()));
    // Stores only the average at hour grain: cannot serve a day rollup.
    fx.registry
        .register(descriptor(
            "mv_hour_avg_only",
            Grain::Hour,
            &[],
            vec![purchase.clone()],
            vec![("avg_total", MeasureExpr::plain(AggFunc::Avg, Some("total_price")))],
            1_000,
        ))
        .unwrap();

    let q = query(
        r#"{
            "from": "events",
            "select": ["day", {"AVG": "total_price"}],
            "where": [{"col": "type", "op": "eq", "val": "purchase"}],
            "group_by": ["day"]
        }"#,
    );
    let routing = fx.planner.plan(&q, &fx.registry.snapshot(), &fx.lake).unwrap();
    assert_eq!(routing.plan.source, PlanSource::Base);

    // With sum and count partials alongside, the rollup is served.
    fx.registry
        .register(descriptor(
            "mv_hour_purchase_parts",
            Grain::Hour,
            &[],
            vec![purchase.clone()],
            vec![
                ("sum_total", MeasureExpr::plain(AggFunc::Sum, Some("total_price"))),
                ("cnt_total", MeasureExpr::plain(AggFunc::Count, Some("total_price"))),
            ],
            1_000,
        ))
        .unwrap();
    let routing = fx.planner.plan(&q, &fx.registry.snapshot(), &fx.lake).unwrap();
    assert_eq!(
        routing.plan.source,
        PlanSource::View {
            name: "mv_hour_purchase_parts".to_string()
        }
    );
    assert!(routing.plan.projection.iter().any(|p| matches!(
        &p.expr,
        ColumnExpr::AvgFromParts { sum, count } if sum == "sum_total" && count == "cnt_total"
    )));
}

#[test]
fn filtered_measures_absorb_query_filter_with_guard() {
    let fx = fixture(&["2025-01-01"]);
    // Wide view: no build filter, type not among dims; impressions live in
    // filtered measures.
    fx.registry
        .register(descriptor(
            "mv_day_country_wide",
            Grain::Day,
            &["country"],
            vec![],
            vec![
                (
                    "sum_bid_impr",
                    MeasureExpr::filtered(AggFunc::Sum, Some("bid_price"), impression_filter()),
                ),
                (
                    "cnt_impr",
                    MeasureExpr::filtered(AggFunc::Count, None, impression_filter()),
                ),
            ],
            20_000,
        ))
        .unwrap();

    let q = query(
        r#"{
            "from": "events",
            "select": ["country", {"SUM": "bid_price"}],
            "where": [{"col": "type", "op": "eq", "val": "impression"}],
            "group_by": ["country"]
        }"#,
    );
    let routing = fx.planner.plan(&q, &fx.registry.snapshot(), &fx.lake).unwrap();
    let plan = routing.plan;
    assert!(matches!(plan.source, PlanSource::View { .. }));
    // The consumed filter leaves no residual but installs the group guard.
    assert!(plan.residual_filters.is_empty());
    assert_eq!(plan.group_guard, Some("cnt_impr".to_string()));
}

#[test]
fn planning_is_deterministic_for_a_fixed_snapshot() {
    let fx = fixture(&["2025-09-10", "2025-09-11"]);
    // Two equally-scoring views; the smaller one must win every time.
    for (name, size) in [("mv_beta", 9_000u64), ("mv_alpha", 3_000u64)] {
        fx.registry
            .register(descriptor(
                name,
                Grain::Day,
                &["country"],
                vec![],
                vec![("events", MeasureExpr::plain(AggFunc::Count, None))],
                size,
            ))
            .unwrap();
    }

    let q = query(
        r#"{
            "from": "events",
            "select": ["day", "country", {"COUNT": "*"}],
            "group_by": ["day", "country"]
        }"#,
    );

    let snapshot = fx.registry.snapshot();
    let first = fx.planner.plan(&q, &snapshot, &fx.lake).unwrap();
    for _ in 0..5 {
        let again = fx.planner.plan(&q, &snapshot, &fx.lake).unwrap();
        assert_eq!(again.plan, first.plan);
    }
    assert_eq!(
        first.plan.source,
        PlanSource::View {
            name: "mv_alpha".to_string()
        }
    );
    // Equal scores: the smaller candidate carries the larger reported bonus.
    assert_eq!(first.candidates[0].name, "mv_alpha");
    assert!(first.candidates[0].size_bonus > first.candidates[1].size_bonus);
}

#[test]
fn force_base_bypasses_views() {
    let fx = fixture(&["2025-01-01"]);
    fx.registry
        .register(descriptor(
            "mv_day",
            Grain::Day,
            &[],
            vec![],
            vec![("events", MeasureExpr::plain(AggFunc::Count, None))],
            100,
        ))
        .unwrap();

    let q = query(
        r#"{"from": "events", "select": ["day", {"COUNT": "*"}], "group_by": ["day"]}"#,
    );
    let routing = fx
        .planner
        .plan_with(
            &q,
            &fx.registry.snapshot(),
            &fx.lake,
            PlanOptions { force_base: true },
        )
        .unwrap();
    assert_eq!(routing.plan.source, PlanSource::Base);
}

#[test]
fn view_missing_a_measure_falls_back_to_base() {
    let fx = fixture(&["2025-01-01"]);
    fx.registry
        .register(descriptor(
            "mv_day_country",
            Grain::Day,
            &["country"],
            vec![],
            vec![("events", MeasureExpr::plain(AggFunc::Count, None))],
            100,
        ))
        .unwrap();

    // MIN is not stored anywhere: the measure gate eliminates the view.
    let q = query(
        r#"{
            "from": "events",
            "select": ["day", "country", {"MIN": "bid_price"}],
            "group_by": ["day", "country"]
        }"#,
    );
    let routing = fx.planner.plan(&q, &fx.registry.snapshot(), &fx.lake).unwrap();
    assert_eq!(routing.plan.source, PlanSource::Base);
    assert_eq!(routing.plan.match_type, MatchType::Base);
}
