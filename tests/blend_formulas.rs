use paintcore::blend::{BlendMode, alpha_blend, blend, blend_premultiplied, premultiply};
use paintcore::canvas::{TRANSPARENT, alpha_of, pack_rgba, unit_to_byte, unpack_rgba};

#[test]
fn multiply_half_white_over_opaque_black() {
    let dst = 0x0000_00FF;
    let src = 0xFFFF_FF80;

    // Channel math on straight alpha: multiply(0, 1) = 0, so colour stays 0
    // and alpha is top + base * (1 - top) = 1.
    let top_a = 128.0 / 255.0;
    let base_a = 1.0;
    let out_a = top_a + base_a * (1.0 - top_a);
    let mixed = (1.0 - base_a) * 1.0 + base_a * (0.0 * 1.0);
    let c = (mixed * top_a + 0.0 * base_a * (1.0 - top_a)) / out_a;
    let expected = pack_rgba(unit_to_byte(c), unit_to_byte(c), unit_to_byte(c), unit_to_byte(out_a));

    assert_eq!(blend(dst, src, BlendMode::Multiply, 1.0), expected);
    assert_eq!(expected, 0x0000_00FF);
}

#[test]
fn multiply_grey_over_grey_matches_formula() {
    let dst = pack_rgba(200, 100, 50, 255);
    let src = pack_rgba(128, 128, 128, 255);
    let [r, g, b, a] = unpack_rgba(blend(dst, src, BlendMode::Multiply, 1.0));
    let m = |base: u8| unit_to_byte(base as f32 / 255.0 * (128.0 / 255.0));
    assert_eq!([r, g, b, a], [m(200), m(100), m(50), 255]);
}

#[test]
fn alpha_identities_hold_for_every_mode() {
    let dst = pack_rgba(10, 20, 30, 200);
    for &mode in BlendMode::all() {
        assert_eq!(blend(dst, pack_rgba(90, 80, 70, 0), mode, 1.0), dst, "{mode:?}");
        assert_eq!(blend(dst, pack_rgba(90, 80, 70, 255), mode, 0.0), dst, "{mode:?}");
        assert_eq!(blend(TRANSPARENT, TRANSPARENT, mode, 1.0), TRANSPARENT, "{mode:?}");
    }
    let opaque = pack_rgba(1, 2, 3, 255);
    assert_eq!(alpha_blend(dst, opaque), opaque);
    assert_eq!(alpha_blend(dst, TRANSPARENT), dst);
}

#[test]
fn premultiplied_over_agrees_with_straight_over_for_opaque_backdrop() {
    let dst = pack_rgba(0, 0, 255, 255);
    let src = pack_rgba(255, 0, 0, 128);
    let straight = alpha_blend(dst, src);
    let pre = blend_premultiplied(premultiply(dst), premultiply(src));
    let (s, p) = (unpack_rgba(straight), unpack_rgba(pre));
    for i in 0..4 {
        assert!((s[i] as i32 - p[i] as i32).abs() <= 1, "channel {i}: {s:?} vs {p:?}");
    }
    assert_eq!(alpha_of(pre), 255);
}

#[test]
fn dodge_and_burn_guard_their_divisors() {
    let dst = pack_rgba(128, 64, 200, 255);
    let white = pack_rgba(255, 255, 255, 255);
    let black = pack_rgba(0, 0, 0, 255);
    assert_eq!(unpack_rgba(blend(dst, white, BlendMode::ColorDodge, 1.0))[..3], [255, 255, 255]);
    assert_eq!(unpack_rgba(blend(dst, black, BlendMode::ColorBurn, 1.0))[..3], [0, 0, 0]);
}
