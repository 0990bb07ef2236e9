// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use rill_collection::{Collection, CollectionConfig, CollectionStatus, SyncHandle, SyncSource, SyncWrite};
use rill_flow::LiveQuery;
use rill_query::{Direction, IndexFlavor, QueryBuilder, expr};
use rill_type::{Key, Value, object};

/// Test sync source driven through its stored handle.
struct TestSync {
	rows: Mutex<Vec<Value>>,
	handle: Mutex<Option<SyncHandle>>,
	load_subset_calls: AtomicUsize,
}

impl TestSync {
	fn with_rows(rows: Vec<Value>) -> Arc<Self> {
		Arc::new(Self {
			rows: Mutex::new(rows),
			handle: Mutex::new(None),
			load_subset_calls: AtomicUsize::new(0),
		})
	}

	fn handle(&self) -> SyncHandle {
		self.handle.lock().clone().expect("sync started")
	}

	fn server_insert(&self, row: Value) {
		let handle = self.handle();
		handle.begin();
		handle.write(SyncWrite::insert(row)).unwrap();
		handle.commit().unwrap();
	}

	fn server_update(&self, row: Value) {
		let handle = self.handle();
		handle.begin();
		handle.write(SyncWrite::update(row)).unwrap();
		handle.commit().unwrap();
	}

	fn server_delete(&self, row: Value) {
		let handle = self.handle();
		handle.begin();
		handle.write(SyncWrite::delete(row)).unwrap();
		handle.commit().unwrap();
	}
}

impl SyncSource for TestSync {
	fn sync(&self, handle: SyncHandle) -> Option<Box<dyn FnOnce() + Send>> {
		*self.handle.lock() = Some(handle.clone());
		let rows: Vec<Value> = self.rows.lock().clone();
		handle.begin();
		for row in rows {
			handle.write(SyncWrite::insert(row)).unwrap();
		}
		handle.commit().unwrap();
		handle.mark_ready();
		None
	}

	fn load_subset(&self, _options: &rill_collection::SubsetOptions, _handle: &SyncHandle) -> bool {
		self.load_subset_calls.fetch_add(1, Ordering::SeqCst);
		false
	}
}

fn collection_with(rows: Vec<Value>) -> (Arc<TestSync>, Collection) {
	let sync = TestSync::with_rows(rows);
	let collection = Collection::create(CollectionConfig::new(sync.clone()));
	(sync, collection)
}

fn ids(rows: &[Value]) -> Vec<i64> {
	rows.iter().map(|row| row.field("id").as_int8().unwrap()).collect()
}

#[test]
fn test_filtered_live_query_tracks_changes() {
	let (sync, todos) = collection_with(vec![
		object! { id: 1, status: "open" },
		object! { id: 2, status: "done" },
	]);

	let query = QueryBuilder::from("t", todos.id())
		.filter(expr::eq(expr::prop("t.status"), expr::value("open")))
		.map([("id", expr::prop("t.id")), ("status", expr::prop("t.status"))])
		.build()
		.unwrap();
	let live = LiveQuery::new(query, [todos]).unwrap();
	live.preload().unwrap();

	assert_eq!(ids(&live.rows()), vec![1]);

	sync.server_insert(object! { id: 3, status: "open" });
	assert_eq!(live.rows().len(), 2);

	// crossing the predicate boundary removes the row
	sync.server_update(object! { id: 1, status: "done" });
	assert_eq!(ids(&live.rows()), vec![3]);

	sync.server_delete(object! { id: 3, status: "open" });
	assert!(live.rows().is_empty());
}

#[test]
fn test_join_live_query_merges_both_sides() {
	let (user_sync, users) = collection_with(vec![object! { id: 10, name: "ada" }]);
	let (order_sync, orders) = collection_with(vec![
		object! { id: 1, user_id: 10, total: 30 },
		object! { id: 2, user_id: 99, total: 50 },
	]);

	let query = QueryBuilder::from("o", orders.id())
		.join("u", users.id(), expr::eq(expr::prop("o.user_id"), expr::prop("u.id")))
		.map([
			("id", expr::prop("o.id")),
			("total", expr::prop("o.total")),
			("buyer", expr::prop("u.name")),
		])
		.build()
		.unwrap();
	let live = LiveQuery::new(query, [orders, users]).unwrap();

	let rows = live.rows();
	assert_eq!(rows.len(), 1, "only the matched order joins");
	assert_eq!(rows[0].field("buyer"), &Value::utf8("ada"));

	// the missing user arrives; order 2 joins incrementally
	user_sync.server_insert(object! { id: 99, name: "lin" });
	assert_eq!(live.rows().len(), 2);

	// removing a user removes their joined rows
	user_sync.server_delete(object! { id: 10, name: "ada" });
	let rows = live.rows();
	assert_eq!(ids(&rows), vec![2]);

	order_sync.server_delete(object! { id: 2, user_id: 99, total: 50 });
	assert!(live.rows().is_empty());
}

#[test]
fn test_left_join_pads_missing_side() {
	let (_user_sync, users) = collection_with(vec![]);
	let (_order_sync, orders) = collection_with(vec![object! { id: 1, user_id: 10 }]);

	let query = QueryBuilder::from("o", orders.id())
		.left_join("u", users.id(), expr::eq(expr::prop("o.user_id"), expr::prop("u.id")))
		.map([("id", expr::prop("o.id")), ("buyer", expr::prop("u.name"))])
		.build()
		.unwrap();
	let live = LiveQuery::new(query, [orders, users]).unwrap();

	let rows = live.rows();
	assert_eq!(rows.len(), 1);
	assert!(rows[0].field("buyer").is_undefined());
}

#[test]
fn test_grouped_live_query_maintains_aggregates() {
	let (sync, sales) = collection_with(vec![
		object! { id: 1, region: "west", amount: 10 },
		object! { id: 2, region: "west", amount: 5 },
		object! { id: 3, region: "east", amount: 7 },
	]);

	let query = QueryBuilder::from("s", sales.id())
		.group_by([expr::prop("s.region")])
		.map([
			("region", expr::prop("s.region")),
			("total", expr::sum(expr::prop("s.amount"))),
			("orders", expr::count()),
		])
		.build()
		.unwrap();
	let live = LiveQuery::new(query, [sales]).unwrap();

	let total_for = |live: &LiveQuery, region: &str| {
		live.rows()
			.into_iter()
			.find(|row| row.field("region") == &Value::utf8(region))
			.map(|row| row.field("total").clone())
	};

	assert_eq!(total_for(&live, "west"), Some(Value::Int8(15)));
	assert_eq!(total_for(&live, "east"), Some(Value::Int8(7)));

	sync.server_insert(object! { id: 4, region: "east", amount: 3 });
	assert_eq!(total_for(&live, "east"), Some(Value::Int8(10)));

	sync.server_delete(object! { id: 1, region: "west", amount: 10 });
	assert_eq!(total_for(&live, "west"), Some(Value::Int8(5)));

	sync.server_delete(object! { id: 2, region: "west", amount: 5 });
	assert_eq!(total_for(&live, "west"), None, "empty group retracts its row");
}

#[test]
fn test_having_filters_groups() {
	let (sync, sales) = collection_with(vec![
		object! { id: 1, region: "west", amount: 10 },
		object! { id: 2, region: "east", amount: 3 },
	]);

	let query = QueryBuilder::from("s", sales.id())
		.group_by([expr::prop("s.region")])
		.having(expr::gte(expr::sum(expr::prop("s.amount")), expr::value(10)))
		.map([("region", expr::prop("s.region")), ("total", expr::sum(expr::prop("s.amount")))])
		.build()
		.unwrap();
	let live = LiveQuery::new(query, [sales]).unwrap();

	assert_eq!(live.rows().len(), 1);

	// east crosses the having threshold incrementally
	sync.server_insert(object! { id: 3, region: "east", amount: 8 });
	assert_eq!(live.rows().len(), 2);
}

#[test]
fn test_order_by_desc_with_invalid_value_terminates_deterministically() {
	// one row carries a NaN sort value (an invalid date, say)
	let (_sync, events) = collection_with(vec![
		object! { id: 1, at: 10.0 },
		object! { id: 2, at: f64::NAN },
		object! { id: 3, at: 30.0 },
		object! { id: 4, at: 20.0 },
		object! { id: 5, at: 5.0 },
	]);

	let query = QueryBuilder::from("e", events.id())
		.sort(expr::prop("e.at"), Direction::Desc)
		.take(3)
		.map([("id", expr::prop("e.id")), ("at", expr::prop("e.at"))])
		.build()
		.unwrap();
	let live = LiveQuery::new(query, [events]).unwrap();
	live.preload().unwrap();

	let rows = live.rows();
	assert_eq!(rows.len(), 3, "exactly three rows, no hang");
	// NaN sorts greatest, so under desc it deterministically leads
	assert_eq!(ids(&rows), vec![2, 3, 4]);
}

#[test]
fn test_selective_filter_with_unfilled_limit_stays_ready() {
	let rows: Vec<Value> = (1..=20).map(|i| object! { id: i, value: i * 5 }).collect();
	let (sync, numbers) = collection_with(rows);

	let query = QueryBuilder::from("n", numbers.id())
		.filter(expr::gt(expr::prop("n.value"), expr::value(90)))
		.sort(expr::prop("n.value"), Direction::Desc)
		.take(10)
		.map([("id", expr::prop("n.id")), ("value", expr::prop("n.value"))])
		.build()
		.unwrap();
	let live = LiveQuery::new(query, [numbers]).unwrap();
	live.preload().unwrap();

	// only two rows match; the window stays unfilled without looping
	let values: Vec<i64> = live.rows().iter().map(|row| row.field("value").as_int8().unwrap()).collect();
	assert_eq!(values, vec![100, 95]);
	assert_eq!(live.collection().status(), CollectionStatus::Ready);

	let calls_before = sync.load_subset_calls.load(Ordering::SeqCst);
	// irrelevant updates must not trigger refill storms
	for bump in 1..=5 {
		sync.server_update(object! { id: 1, value: 5 + bump });
	}
	let calls_after = sync.load_subset_calls.load(Ordering::SeqCst);
	assert!(calls_after - calls_before <= 1, "updates re-triggered {} subset loads", calls_after - calls_before);
	assert_eq!(live.rows().len(), 2);

	// a genuinely better row still enters the window
	sync.server_insert(object! { id: 21, value: 98 });
	let values: Vec<i64> = live.rows().iter().map(|row| row.field("value").as_int8().unwrap()).collect();
	assert_eq!(values, vec![100, 98, 95]);
}

#[test]
fn test_fractional_index_flavor_orders_rows() {
	let (sync, items) = collection_with(vec![
		object! { id: 1, rank: 2 },
		object! { id: 2, rank: 1 },
	]);

	let query = QueryBuilder::from("i", items.id())
		.sort(expr::prop("i.rank"), Direction::Asc)
		.index_flavor(IndexFlavor::Fractional)
		.map([("id", expr::prop("i.id")), ("rank", expr::prop("i.rank"))])
		.build()
		.unwrap();
	let live = LiveQuery::new(query, [items]).unwrap();

	assert_eq!(ids(&live.rows()), vec![2, 1]);

	// inserting between the two keeps both neighbours' indices stable
	let before: Vec<Value> = live.rows().iter().map(|row| row.field("__index").clone()).collect();
	sync.server_insert(object! { id: 3, rank: 1 });
	let rows = live.rows();
	assert_eq!(ids(&rows), vec![2, 3, 1]);
	let after: Vec<Value> = rows
		.iter()
		.filter(|row| row.field("id") != &Value::Int8(3))
		.map(|row| row.field("__index").clone())
		.collect();
	assert_eq!(before, after);
}

#[test]
fn test_find_one_returns_single_row() {
	let (sync, users) = collection_with(vec![object! { id: 1, name: "ada" }, object! { id: 2, name: "lin" }]);

	let query = QueryBuilder::from("u", users.id())
		.filter(expr::eq(expr::prop("u.id"), expr::value(2)))
		.map([("id", expr::prop("u.id")), ("name", expr::prop("u.name"))])
		.find_one()
		.build()
		.unwrap();
	let live = LiveQuery::new(query, [users]).unwrap();

	assert_eq!(live.first().unwrap().field("name"), &Value::utf8("lin"));

	sync.server_delete(object! { id: 2, name: "lin" });
	assert!(live.first().is_none());
}

#[test]
fn test_chained_live_queries_propagate() {
	let (sync, sales) = collection_with(vec![
		object! { id: 1, region: "west", amount: 10 },
		object! { id: 2, region: "east", amount: 3 },
	]);

	let totals_query = QueryBuilder::from("s", sales.id())
		.group_by([expr::prop("s.region")])
		.map([("region", expr::prop("s.region")), ("total", expr::sum(expr::prop("s.amount")))])
		.build()
		.unwrap();
	let totals = LiveQuery::new(totals_query, [sales.clone()]).unwrap();

	// a second live query over the first one's output collection
	let big_query = QueryBuilder::from("t", totals.collection().id())
		.filter(expr::gte(expr::prop("t.total"), expr::value(10)))
		.map([("region", expr::prop("t.region")), ("total", expr::prop("t.total"))])
		.build()
		.unwrap();
	let big = LiveQuery::new(big_query, [totals.collection().clone()]).unwrap();

	assert_eq!(big.rows().len(), 1);

	sync.server_insert(object! { id: 3, region: "east", amount: 9 });
	let rows = big.rows();
	assert_eq!(rows.len(), 2, "the change flowed through both live queries");
	assert!(rows.iter().any(|row| row.field("total") == &Value::Int8(12)));
}

#[test]
fn test_destroyed_live_query_stops_updating() {
	let (sync, todos) = collection_with(vec![object! { id: 1, status: "open" }]);

	let query = QueryBuilder::from("t", todos.id())
		.map([("id", expr::prop("t.id"))])
		.build()
		.unwrap();
	let live = LiveQuery::new(query, [todos]).unwrap();
	assert_eq!(live.rows().len(), 1);

	live.destroy();
	sync.server_insert(object! { id: 2, status: "open" });
	assert_eq!(live.rows().len(), 1, "destroyed query no longer consumes changes");
}

#[test]
fn test_subquery_source_composes() {
	let (sync, todos) = collection_with(vec![
		object! { id: 1, status: "open", priority: 3 },
		object! { id: 2, status: "open", priority: 1 },
		object! { id: 3, status: "done", priority: 2 },
	]);

	let open = QueryBuilder::from("t", todos.id())
		.filter(expr::eq(expr::prop("t.status"), expr::value("open")))
		.map([("id", expr::prop("t.id")), ("priority", expr::prop("t.priority"))])
		.build()
		.unwrap();
	let urgent = QueryBuilder::from("o", open)
		.filter(expr::lte(expr::prop("o.priority"), expr::value(2)))
		.map([("id", expr::prop("o.id"))])
		.build()
		.unwrap();

	let live = LiveQuery::new(urgent, [todos]).unwrap();
	assert_eq!(ids(&live.rows()), vec![2]);

	sync.server_update(object! { id: 1, status: "open", priority: 2 });
	assert_eq!(live.rows().len(), 2);
}
