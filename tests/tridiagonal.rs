//! Thomas algorithm as two stage groups: forward elimination walking k
//! upwards, then back substitution walking k downwards.
//!
//! The system `-x[k-1] + 3 x[k] + x[k+1] = d[k]` with `d = 4` at the bottom,
//! `d = 2` at the top and `3` in between has the solution `x = 1`.

use stencil_engine::prelude::*;

const OUT: Accessor = Accessor::new(0);
const INF: Accessor = Accessor::new(1);
const DIAG: Accessor = Accessor::new(2);
const SUP: Accessor = Accessor::new(3);
const RHS: Accessor = Accessor::new(4);

const P_OUT: Placeholder = Placeholder::new(0);
const P_INF: Placeholder = Placeholder::new(1);
const P_DIAG: Placeholder = Placeholder::new(2);
const P_SUP: Placeholder = Placeholder::new(3);
const P_RHS: Placeholder = Placeholder::new(4);

fn forward_thomas() -> Stage {
    Stage::new("forward_thomas")
        .inout(P_OUT, Extent::zero())
        .input(P_INF, Extent::zero())
        .input(P_DIAG, Extent::zero())
        .inout(P_SUP, Extent::vertical(-1, 0))
        .inout(P_RHS, Extent::vertical(-1, 0))
        .on(Region::First, |e: &mut Eval<'_>| {
            let diag = e.get(DIAG);
            let sup = e.get(SUP) / diag;
            let rhs = e.get(RHS) / diag;
            e.set(SUP, sup);
            e.set(RHS, rhs);
        })
        .on_regions(&[Region::Interior, Region::Last], |e: &mut Eval<'_>| {
            let (inf, diag) = (e.get(INF), e.get(DIAG));
            let below_sup = e.get(SUP.at(0, 0, -1));
            let below_rhs = e.get(RHS.at(0, 0, -1));
            let denom = diag - below_sup * inf;
            let sup = e.get(SUP) / denom;
            let rhs = (e.get(RHS) - inf * below_rhs) / denom;
            e.set(SUP, sup);
            e.set(RHS, rhs);
        })
}

fn backward_thomas() -> Stage {
    Stage::new("backward_thomas")
        .inout(P_OUT, Extent::vertical(0, 1))
        .input(P_INF, Extent::zero())
        .input(P_DIAG, Extent::zero())
        .inout(P_SUP, Extent::zero())
        .inout(P_RHS, Extent::zero())
        .on(Region::Last, |e: &mut Eval<'_>| {
            let rhs = e.get(RHS);
            e.set(OUT, rhs);
        })
        .on_regions(&[Region::First, Region::Interior], |e: &mut Eval<'_>| {
            let v = e.get(RHS) - e.get(SUP) * e.get(OUT.at(0, 0, 1));
            e.set(OUT, v);
        })
}

fn plan(forward_caches: Vec<CacheDeclaration>) -> ExecutionPlan {
    ExecutionPlan::new()
        .group(StageGroup::new(Direction::Forward).stage(forward_thomas()).caches(forward_caches))
        .group(StageGroup::new(Direction::Backward).stage(backward_thomas()))
}

fn aggregate(backend: Backend, [d1, d2, d3]: [usize; 3]) -> Aggregate {
    let field = |name: &str, init: Real| {
        Field::builder(name, [d1, d2, d3])
            .layout(Layout::default())
            .init(init)
            .for_backend(backend)
            .build()
            .unwrap()
    };
    let mut rhs = field("rhs", 3.0);
    rhs.fill_with(|_, _, k| match k {
        0 => 4.0,
        k if k == d3 - 1 => 2.0,
        _ => 3.0,
    });
    Aggregate::new()
        .with(P_OUT, field("out", 0.0))
        .with(P_INF, field("inf", -1.0))
        .with(P_DIAG, field("diag", 3.0))
        .with(P_SUP, field("sup", 1.0))
        .with(P_RHS, rhs)
}

fn solve(backend: Backend, dims: [usize; 3], block: (usize, usize), caches: Vec<CacheDeclaration>) -> Field {
    let mut agg = aggregate(backend, dims);
    for p in [P_OUT, P_INF, P_DIAG, P_SUP, P_RHS] {
        agg.field_mut(p).unwrap().h2d_update().unwrap();
    }
    let config = ExecConfig::default()
        .with_backend(backend)
        .with_block_size(block.0, block.1)
        .with_checked(true);
    let mut comp = Computation::new(agg, Grid::new(dims[0], dims[1], dims[2]), plan(caches), config);
    comp.prepare().unwrap();
    comp.run().unwrap();
    comp.field_mut(P_OUT).unwrap().d2h_update().unwrap();
    comp.finalize();
    comp.into_aggregate().into_fields().swap_remove(0)
}

fn assert_solution_is_one(out: &Field) {
    let [d1, d2, d3] = out.dims();
    let expected = Field::new(d1, d2, d3, 1.0, "solution");
    let grid = Grid::new(d1, d2, d3);
    assert!(Verifier::new(1e-12).verify(&grid, &expected, out, [[0, 0]; 3]), "{out}");
}

#[test]
fn test_thomas_host() {
    for nk in [2, 6, 11] {
        let out = solve(Backend::Host, [5, 4, nk], (2, 3), Vec::new());
        assert_solution_is_one(&out);
    }
}

#[test]
fn test_thomas_host_single_block() {
    let out = solve(Backend::Host, [3, 3, 6], (8, 8), Vec::new());
    assert_solution_is_one(&out);
}

#[test]
fn test_thomas_host_column_caches() {
    let caches = cache_all(CacheScope::K, CachePolicy::FillAndFlush, &[P_SUP, P_RHS]);
    let out = solve(Backend::Host, [4, 4, 6], (2, 2), caches);
    assert_solution_is_one(&out);
}

#[test]
#[cfg_attr(feature = "wgpu", ignore = "needs a GPU adapter")]
fn test_thomas_gpu() {
    for nk in [2, 6, 11] {
        let out = solve(Backend::Gpu, [5, 4, nk], (3, 2), Vec::new());
        assert_solution_is_one(&out);
    }
}

#[test]
#[cfg_attr(feature = "wgpu", ignore = "needs a GPU adapter")]
fn test_thomas_gpu_ijk_caches() {
    let caches = cache_all(CacheScope::IJK, CachePolicy::FillAndFlush, &[P_SUP, P_RHS]);
    let out = solve(Backend::Gpu, [4, 5, 6], (4, 4), caches);
    assert_solution_is_one(&out);
}
