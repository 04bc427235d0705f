use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rift_mock::config::{MatchOperator, ResourceConfig, ValueMatch};
use rift_mock::http::{HttpMethod, MockRequest};
use rift_mock::matcher::{match_resource, CompiledResource, PathTemplate};

fn create_resource(id: usize, templated: bool) -> ResourceConfig {
    let path = if templated {
        format!("/api/v1/endpoint{id}/{{itemId}}")
    } else {
        format!("/api/v1/endpoint{id}")
    };
    ResourceConfig::new(HttpMethod::Get, path)
}

fn compile_resources(count: usize, templated: bool) -> Vec<CompiledResource> {
    (0..count)
        .map(|i| CompiledResource::compile(&create_resource(i, templated)).unwrap())
        .collect()
}

fn compile_resources_with_predicates(count: usize) -> Vec<CompiledResource> {
    (0..count)
        .map(|i| {
            let mut resource = create_resource(i, false);
            resource.query_params.insert(
                "limit".to_string(),
                ValueMatch::Detailed {
                    value: Some(r"\d+".to_string()),
                    operator: MatchOperator::Matches,
                },
            );
            resource
                .request_headers
                .insert("X-Tenant".to_string(), ValueMatch::Simple("acme".to_string()));
            CompiledResource::compile(&resource).unwrap()
        })
        .collect()
}

fn bench_resource_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("resource_matching");

    for count in [10, 50, 100, 500, 1000].iter() {
        let resources = compile_resources(*count, false);
        let first = MockRequest::new(HttpMethod::Get, "/api/v1/endpoint0");
        let last = MockRequest::new(HttpMethod::Get, &format!("/api/v1/endpoint{}", count - 1));
        let miss = MockRequest::new(HttpMethod::Get, "/api/v2/missing");

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("match_first", count), count, |b, _| {
            b.iter(|| match_resource(black_box(&resources), black_box(&first)))
        });
        group.bench_with_input(BenchmarkId::new("match_last", count), count, |b, _| {
            b.iter(|| match_resource(black_box(&resources), black_box(&last)))
        });
        group.bench_with_input(BenchmarkId::new("no_match", count), count, |b, _| {
            b.iter(|| match_resource(black_box(&resources), black_box(&miss)))
        });
    }

    group.finish();
}

fn bench_templated_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("templated_matching");

    for count in [10, 100, 1000].iter() {
        let resources = compile_resources(*count, true);
        let request = MockRequest::new(
            HttpMethod::Get,
            &format!("/api/v1/endpoint{}/item-42", count / 2),
        );

        group.bench_with_input(BenchmarkId::new("path_params", count), count, |b, _| {
            b.iter(|| match_resource(black_box(&resources), black_box(&request)))
        });
    }

    group.finish();
}

fn bench_predicate_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("predicate_matching");

    for count in [10, 100].iter() {
        let resources = compile_resources_with_predicates(*count);
        let request = MockRequest::new(
            HttpMethod::Get,
            &format!("/api/v1/endpoint{}?limit=25", count - 1),
        )
        .with_header("x-tenant", "acme");

        group.bench_with_input(BenchmarkId::new("query_and_header", count), count, |b, _| {
            b.iter(|| match_resource(black_box(&resources), black_box(&request)))
        });
    }

    group.finish();
}

fn bench_path_template(c: &mut Criterion) {
    let template = PathTemplate::parse("/stores/{storeId}/orders/{orderId}/*").unwrap();

    c.bench_function("path_template_match", |b| {
        b.iter(|| template.matches(black_box("/stores/s1/orders/o%2042/lines/3")))
    });
}

criterion_group!(
    benches,
    bench_resource_matching,
    bench_templated_matching,
    bench_predicate_matching,
    bench_path_template
);
criterion_main!(benches);
