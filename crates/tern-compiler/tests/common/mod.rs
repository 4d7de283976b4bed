//! Programs shared by the end-to-end tests, with their expected output

#![allow(dead_code)]

use tern_compiler::{CompilerOptions, OptLevel};

pub struct Case {
    pub name: &'static str,
    pub source: &'static str,
    pub output: &'static [&'static str],
    pub uncaught: Option<&'static str>,
}

pub const CORPUS: &[Case] = &[
    Case {
        name: "arithmetic",
        source: "
            var a = 7, b = 2;
            print(a + b, a - b, a * b, a / b, a % b, a ** b);
            print(a & b, a | b, a ^ b, a << b, a >> 1, -a >>> 28);
            print(1 / 0, -1 / 0, 0 / 0);
        ",
        output: &["9 5 14 3.5 1 49", "2 7 5 28 3 15", "Infinity -Infinity NaN"],
        uncaught: None,
    },
    Case {
        name: "coercion",
        source: "
            var s = 'a' + 1 + 2;
            print(s, 1 + 2 + 'a', '3' * '4', 'b' < 'a', typeof s, typeof 1, typeof undefined, typeof null);
            print(1 == '1', 1 === '1', null == undefined, null === undefined, NaN == NaN);
        ",
        output: &["a12 3a 12 false string number undefined object", "true false true false false"],
        uncaught: None,
    },
    Case {
        name: "loops",
        source: "
            var total = 0;
            for (var i = 0; i < 10; i++) { if (i % 2) continue; total += i; }
            var j = 0;
            while (true) { j++; if (j > 5) break; }
            var k = 10;
            do { k -= 3; } while (k > 0);
            print(total, j, k);
        ",
        output: &["20 6 -2"],
        uncaught: None,
    },
    Case {
        name: "labels",
        source: "
            var found = '';
            outer: for (var x = 0; x < 3; x++) {
                for (var y = 0; y < 3; y++) {
                    if (y === 2) continue outer;
                    if (x === 2) break outer;
                    found += x + '' + y + ' ';
                }
            }
            print(found);
        ",
        output: &["00 01 10 11 "],
        uncaught: None,
    },
    Case {
        name: "closures",
        source: "
            function makeCounter(start) {
                let count = start;
                return { inc: function () { count += 1; return count; }, get: () => count };
            }
            var c1 = makeCounter(10), c2 = makeCounter(0);
            c1.inc(); c1.inc(); c2.inc();
            print(c1.get(), c2.get());
            function adders() {
                var fs = [];
                for (var i = 0; i < 3; i++) { fs[i] = function (x) { return x + i; }; }
                return fs;
            }
            var fs = adders();
            print(fs[0](1), fs[2](1));
        ",
        output: &["12 1", "4 4"],
        uncaught: None,
    },
    Case {
        name: "switch",
        source: "
            function name(n) {
                switch (n) {
                    case 1: return 'one';
                    case 2:
                    case 3: return 'few';
                    case 'x': return 'letter';
                    default: return 'many';
                }
            }
            print(name(1), name(3), name('x'), name(9));
            function fall(n) {
                var out = '';
                switch (n) { case 0: out += 'a'; case 1: out += 'b'; break; case 2: out += 'c'; }
                return out;
            }
            print(fall(0), fall(1), fall(2), fall(5) === '');
            function pick(v, k) { switch (v) { case k: return 'k'; case k + 1: return 'k+1'; } return 'none'; }
            print(pick(4, 4), pick(5, 4), pick(0, 4));
        ",
        output: &["one few letter many", "ab b c true", "k k+1 none"],
        uncaught: None,
    },
    Case {
        name: "exceptions",
        source: "
            function risky(n) { if (n > 2) throw new RangeError('too big: ' + n); return n * 2; }
            function attempt(n) {
                var log = 'start';
                try { log += ' ' + risky(n); } catch (e) { log += ' caught ' + e.message; } finally { log += ' done'; }
                return log;
            }
            print(attempt(1));
            print(attempt(5));
            try { null.x; } catch (e) { print(e instanceof TypeError, e.name); }
            function nested() {
                try { try { throw 'inner'; } finally { print('cleanup'); } } catch (e) { return 'got ' + e; }
            }
            print(nested());
        ",
        output: &[
            "start 2 done",
            "start caught too big: 5 done",
            "true TypeError",
            "cleanup",
            "got inner",
        ],
        uncaught: None,
    },
    Case {
        name: "finally-exits",
        source: "
            function fin() {
                for (var i = 0; i < 3; i++) {
                    try { if (i === 1) continue; if (i === 2) return 'ret ' + i; } finally { print('fin ' + i); }
                }
            }
            print(fin());
        ",
        output: &["fin 0", "fin 1", "fin 2", "ret 2"],
        uncaught: None,
    },
    Case {
        name: "objects",
        source: "
            var o = { a: 1, 'b c': 2 };
            o.d = o.a + o['b c'];
            var key = 'a';
            print(o.d, o[key], 'a' in o, 'z' in o, delete o.a, 'a' in o);
            var arr = [1, 2, 3];
            arr[arr.length] = 4;
            var sum = 0;
            for (var i = 0; i < arr.length; i++) sum += arr[i];
            print(arr.length, sum, arr);
            function Point(x, y) { this.x = x; this.y = y; }
            var p = new Point(3, 4);
            print(p.x * p.y, p instanceof Point, o instanceof Point, typeof Point, typeof p);
        ",
        output: &["3 1 true false true false", "4 10 1,2,3,4", "12 true false function object"],
        uncaught: None,
    },
    Case {
        name: "recursion",
        source: "
            function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); }
            function fact(n) { if (n <= 1) return 1; return n * fact(n - 1); }
            print(fib(15), fact(10));
        ",
        output: &["610 3628800"],
        uncaught: None,
    },
    Case {
        name: "temporal-dead-zone",
        source: "
            function tdz() { try { print(v); let v = 1; } catch (e) { return e.name; } }
            print(tdz());
            let late = 5;
            print(late);
        ",
        output: &["ReferenceError", "5"],
        uncaught: None,
    },
    Case {
        name: "bigint",
        source: "
            var big = 2n ** 64n;
            print(big, big + 1n, typeof big, 10n / 3n, -7n % 3n);
            try { print(1n + 1); } catch (e) { print(e.name); }
        ",
        output: &[
            "18446744073709551616 18446744073709551617 bigint 3 -1",
            "TypeError",
        ],
        uncaught: None,
    },
    Case {
        name: "operators",
        source: "
            var n = null, z = 0, u;
            print(n ?? 'dflt', z ?? 'dflt', z || 'or', 'x' && 'and', u === undefined);
            var i = 5;
            var a = i++, b = ++i, c = i--, d = --i;
            print(a, b, c, d, i);
            var q = 3; q *= 2; q -= 1; q **= 2; q %= 7; q <<= 2; q |= 1;
            print(q, 1 < 2 ? 'yes' : 'no', !0, !!'');
        ",
        output: &["dflt 0 or and true", "5 7 7 5 5", "17 yes true false"],
        uncaught: None,
    },
    Case {
        name: "scopes",
        source: "
            function outer() {
                let x = 'outer';
                function middle() {
                    let y = 'middle';
                    return function inner() { return x + '/' + y; };
                }
                { let x = 'block'; print(x); }
                return middle()();
            }
            print(outer());
            let shadow = 1;
            { let shadow = 2; print(shadow); }
            print(shadow);
        ",
        output: &["block", "outer/middle", "2", "1"],
        uncaught: None,
    },
    Case {
        name: "uncaught",
        source: "
            function boom() { throw new Error('kaboom'); }
            print('before');
            boom();
            print('after');
        ",
        output: &["before"],
        uncaught: Some("Error: kaboom"),
    },
    Case {
        name: "hoisting",
        source: "
            print(hoisted(2));
            function hoisted(n) { return n * 21; }
            var g = 1;
            function bump() { g = g + 1; return g; }
            bump(); bump();
            print(g);
        ",
        output: &["42", "3"],
        uncaught: None,
    },
    Case {
        name: "collatz",
        source: "
            function collatz(n) {
                var steps = 0;
                while (n !== 1) { n = n % 2 === 0 ? n / 2 : 3 * n + 1; steps++; }
                return steps;
            }
            print(collatz(27));
        ",
        output: &["111"],
        uncaught: None,
    },
    Case {
        name: "arguments-and-this",
        source: "
            function count(a, b, c) { return (a === undefined) + (b === undefined) * 2 + (c === undefined) * 4; }
            print(count(), count(1), count(1, 2, 3, 4));
            var obj = { v: 7, get: function () { return this.v; } };
            var detached = obj.get;
            print(obj.get(), detached === obj.get);
        ",
        output: &["7 6 0", "7 true"],
        uncaught: None,
    },
    Case {
        name: "local-inlining",
        source: "
            function compute(n) {
                function square(x) { return x * x; }
                function twice(f, x) { return f(f(x)); }
                var total = 0;
                for (var i = 1; i <= n; i++) total += square(i);
                return total + twice(square, 3);
            }
            print(compute(4));
        ",
        output: &["111"],
        uncaught: None,
    },
    Case {
        name: "block-scoped-closures",
        source: "
            var fs = [];
            for (var i = 0; i < 3; i++) { let j = i; fs[i] = function () { return j; }; }
            print(fs[0](), fs[1](), fs[2]());
            var gs = [];
            for (let k = 0; k < 3; k++) { gs[k] = () => k; }
            print(gs[0](), gs[1](), gs[2]());
            var ks = [];
            for (let m = 0; m < 5; m++) { if (m % 2) continue; ks[m / 2] = () => m; }
            print(ks[0](), ks[1](), ks[2]());
            var cs = [];
            for (var t = 0; t < 2; t++) { try { throw t * 10; } catch (e) { cs[t] = () => e; } }
            print(cs[0](), cs[1]());
            var ws = [], w = 0;
            while (w < 2) { const c = w * 2; ws[w] = () => c; w++; }
            print(ws[0](), ws[1]());
        ",
        output: &["0 1 2", "0 1 2", "0 2 4", "0 10", "0 2"],
        uncaught: None,
    },
    Case {
        name: "scoped-finally",
        source: "
            function fin() {
                var out = [];
                try {
                    for (let r = 0; r < 3; r++) { out[r] = () => r; if (r === 1) return out; }
                } finally {
                    let tag = 'done';
                    out[2] = () => tag;
                }
            }
            var fo = fin();
            print(fo[0](), fo[1](), fo[2]());
            function counter() {
                var steps = [];
                for (let n = 0; n < 3; n++) { steps[n] = () => n; n++; }
                return steps;
            }
            var st = counter();
            print(st[0](), st[2]());
        ",
        output: &["0 1 done", "1 3"],
        uncaught: None,
    },
    Case {
        name: "arrow-this",
        source: "
            var o = { v: 7, f: function () { return (() => this.v)(); } };
            print(o.f());
            var p = { v: 1, g: function () { var inner = () => () => this.v + 1; return inner()(); } };
            print(p.g());
            var q = { v: 'own', h: function () { var f = function () { return this; }; return [f() === undefined, (() => this.v)()]; } };
            var r = q.h();
            print(r[0], r[1]);
        ",
        output: &["7", "2", "true own"],
        uncaught: None,
    },
    Case {
        name: "typeof-undeclared",
        source: "
            print(typeof nope, typeof print, typeof undefined);
            try { nope; } catch (e) { print(e.name); }
            nope = 3;
            print(typeof nope);
        ",
        output: &["undefined function undefined", "ReferenceError", "number"],
        uncaught: None,
    },
    Case {
        name: "bigint-relational",
        source: "
            print(5n > 4, 1n < 1.5, 2n <= 2, 2n < 2, -1n > -1.5, 3n > NaN, 1n < Infinity);
            var big = 2n ** 64n;
            print(big > 1e19, big < 2e19, 10 > 9n, big >= 18446744073709551616);
        ",
        output: &["true true true false true false true", "true true true true"],
        uncaught: None,
    },
];

/// Every configuration the differential tests compare
pub fn configurations() -> Vec<(String, CompilerOptions)> {
    let mut configs = vec![
        ("full".to_string(), CompilerOptions::default()),
        (
            "basic".to_string(),
            CompilerOptions {
                opt_level: OptLevel::Basic,
                ..Default::default()
            },
        ),
        ("none".to_string(), CompilerOptions::unoptimized()),
        (
            "parallel".to_string(),
            CompilerOptions {
                parallel: true,
                ..Default::default()
            },
        ),
        ("small-register-file".to_string(), small_register_file()),
    ];
    for pass in tern_compiler::optimize::PASS_NAMES {
        configs.push((format!("without-{}", pass), CompilerOptions::default().disable_pass(pass)));
    }
    configs
}

/// Three allocatable registers, one of them caller-saved
pub fn small_register_file() -> CompilerOptions {
    CompilerOptions {
        register_count: 6,
        caller_saved_registers: 1,
        ..Default::default()
    }
}
