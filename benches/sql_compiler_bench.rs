use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use result_query::ast::{parse_group_by, Query};
use result_query::dialect::PostgresDialect;
use result_query::lexer::tokenize;
use result_query::parser::Parser;
use result_query::schema::FieldSchema;
use result_query::sql_compiler::SqlCompiler;
use result_query::validator::validate;
use result_query::{QueryEngine, QueryRequest};
use std::hint::black_box;
use std::sync::Arc;

const CASES: [(&str, &str); 3] = [
    ("simple", r#"status = "failed""#),
    (
        "medium",
        r#"status = "failed" AND duration > 1000 OR name != "smoke""#,
    ),
    (
        "complex",
        r#"NOT (status = "passed" OR status = "skipped") AND (full_name = "suite.login" OR (duration >= 250.5 AND launch_name = "nightly")) AND session = 42"#,
    ),
];

// Lexing only
fn benchmark_lexer(c: &mut Criterion) {
    let mut group = c.benchmark_group("lexer_performance");

    for (name, query) in CASES {
        group.bench_with_input(BenchmarkId::new("tokenize", name), &query, |b, &query| {
            b.iter(|| black_box(tokenize(black_box(query)).unwrap()))
        });
    }

    group.finish();
}

fn benchmark_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser_performance");

    for (name, query) in CASES {
        let tokens = tokenize(query).unwrap();

        group.bench_with_input(BenchmarkId::new("parse", name), &tokens, |b, tokens| {
            b.iter(|| {
                let mut parser = Parser::new(black_box(tokens));
                black_box(parser.parse().unwrap())
            })
        });
    }

    group.finish();
}

// Validation plus SQL generation, with and without grouping
fn benchmark_sql_compiler(c: &mut Criterion) {
    let schema = FieldSchema::builtin();
    let compiler = SqlCompiler::new(Arc::new(PostgresDialect::default()));
    let groupings: [(&str, &[&str]); 2] = [("plain", &[]), ("grouped", &["session", "tag:target"])];

    let mut group = c.benchmark_group("sql_compiler_performance");

    for (name, query) in CASES {
        let tokens = tokenize(query).unwrap();
        let filter = Parser::new(&tokens).parse().unwrap();

        for (grouping, dimensions) in groupings {
            let group_by = parse_group_by(dimensions).unwrap();
            let ast = Query::new(filter.clone(), group_by, 0, 50).unwrap();
            let validated = validate(&ast, &schema).unwrap();

            group.bench_with_input(
                BenchmarkId::new(format!("compile_{grouping}"), name),
                &validated,
                |b, validated| b.iter(|| black_box(compiler.compile(black_box(validated), &schema).unwrap())),
            );
        }
    }

    group.finish();
}

fn benchmark_end_to_end(c: &mut Criterion) {
    let engine = QueryEngine::new(FieldSchema::builtin(), Arc::new(PostgresDialect::default()));

    let mut group = c.benchmark_group("end_to_end_performance");

    for (name, query) in CASES {
        let request = QueryRequest::new(query).group_by(["session", "tag:target", "tag:browser"]);
        group.bench_with_input(BenchmarkId::new("full_pipeline", name), &request, |b, request| {
            b.iter(|| black_box(engine.compile(black_box(request)).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_lexer,
    benchmark_parser,
    benchmark_sql_compiler,
    benchmark_end_to_end
);
criterion_main!(benches);
