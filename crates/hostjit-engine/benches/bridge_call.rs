use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hostjit_engine::{Context, Function, HostFunc, RunValue, Type};

fn mul(a: i64, b: i64) -> i64 {
    a * b
}

fn native_mul(ctx: &Context) -> Function {
    let mut f = ctx.create_function(&[Type::Long, Type::Long], Type::Long).unwrap();
    let (a, b) = (f.param(0).unwrap(), f.param(1).unwrap());
    let p = f.mul(&a, &b).unwrap();
    f.ret(Some(&p)).unwrap();
    f.compile().unwrap();
    f
}

fn bridged_mul(ctx: &Context, calls: usize) -> Function {
    let host = HostFunc::new(mul as fn(i64, i64) -> i64);
    let mut f = ctx.create_function(&[Type::Long, Type::Long], Type::Long).unwrap();
    let (a, b) = (f.param(0).unwrap(), f.param(1).unwrap());
    let mut acc = f.create_long_constant(0).unwrap();
    for _ in 0..calls {
        let p = f.bridge_call(&host, &[a.clone(), b.clone()]).unwrap().remove(0);
        acc = f.add(&acc, &p).unwrap();
    }
    f.ret(Some(&acc)).unwrap();
    f.compile().unwrap();
    f
}

fn bench_round_trip(c: &mut Criterion) {
    let ctx = Context::new().unwrap();
    let native = native_mul(&ctx);
    let args = [RunValue::Int(7), RunValue::Int(8)];

    c.bench_function("native_mul", |b| {
        b.iter(|| native.run(black_box(&args)).unwrap());
    });

    let mut group = c.benchmark_group("bridge_call");
    for calls in [1usize, 4, 16] {
        let f = bridged_mul(&ctx, calls);
        group.bench_with_input(BenchmarkId::new("mul", calls), &f, |b, f| {
            b.iter(|| f.run(black_box(&args)).unwrap());
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let ctx = Context::new().unwrap();
    c.bench_function("compile_bridged_mul", |b| {
        b.iter(|| bridged_mul(&ctx, 1));
    });
}

criterion_group!(benches, bench_round_trip, bench_compile);
criterion_main!(benches);
