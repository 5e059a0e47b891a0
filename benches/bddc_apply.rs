use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kryst_bddc::matrix::{CsrMatrix, IsMatrix, LocalBlock};
use kryst_bddc::preconditioner::{Bddc, Preconditioner};

/// Bilinear Laplacian on `s × s` subdomains of `h × h` elements, boundary
/// nodes eliminated.
fn poisson(s: usize, h: usize) -> IsMatrix {
    let n = s * h;
    let dof = |i: usize, j: usize| (i > 0 && i < n && j > 0 && j < n).then(|| (j - 1) * (n - 1) + (i - 1));
    let ke = [[4.0, -1.0, -2.0, -1.0], [-1.0, 4.0, -1.0, -2.0], [-2.0, -1.0, 4.0, -1.0], [-1.0, -2.0, -1.0, 4.0]];
    let blocks = (0..s * s)
        .map(|sub| {
            let (sx, sy) = (sub % s, sub / s);
            let mut l2g = Vec::new();
            let mut trips = Vec::new();
            for ey in sy * h..(sy + 1) * h {
                for ex in sx * h..(sx + 1) * h {
                    let nodes = [dof(ex, ey), dof(ex + 1, ey), dof(ex + 1, ey + 1), dof(ex, ey + 1)];
                    for (a, ga) in nodes.iter().enumerate() {
                        for (b, gb) in nodes.iter().enumerate() {
                            if let (Some(ga), Some(gb)) = (ga, gb) {
                                trips.push((*ga, *gb, ke[a][b] / 6.0));
                            }
                        }
                    }
                    l2g.extend(nodes.iter().flatten());
                }
            }
            l2g.sort_unstable();
            l2g.dedup();
            let local: Vec<_> = trips
                .into_iter()
                .map(|(i, j, v)| (l2g.binary_search(&i).unwrap(), l2g.binary_search(&j).unwrap(), v))
                .collect();
            let mat = CsrMatrix::from_triplets(l2g.len(), l2g.len(), &local).unwrap();
            LocalBlock::new(l2g, mat)
        })
        .collect();
    let mut a = IsMatrix::new((n - 1) * (n - 1), blocks).unwrap();
    a.set_symmetric(true);
    a
}

fn bench_bddc(c: &mut Criterion) {
    let a = poisson(4, 8);
    let r: Vec<f64> = (0..a.n_global()).map(|i| (i as f64).sin()).collect();
    let mut z = vec![0.0; r.len()];

    c.bench_function("bddc setup 4x4x8", |ben| {
        ben.iter(|| {
            let mut pc = Bddc::default();
            pc.setup(black_box(&a)).unwrap();
        })
    });

    let mut pc = Bddc::default();
    pc.setup(&a).unwrap();
    c.bench_function("bddc apply 4x4x8", |ben| {
        ben.iter(|| pc.apply(black_box(&r), black_box(&mut z)).unwrap())
    });

    let mut deluxe = Bddc::default();
    deluxe.options_mut().use_deluxe_scaling = true;
    deluxe.setup(&a).unwrap();
    c.bench_function("bddc apply deluxe 4x4x8", |ben| {
        ben.iter(|| deluxe.apply(black_box(&r), black_box(&mut z)).unwrap())
    });
}

criterion_group!(benches, bench_bddc);
criterion_main!(benches);
