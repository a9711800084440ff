//! `ndarray.h`, the support header shared by every generated C unit
//!
//! Arrays are passed around as an `nv_ndarray` value: a data pointer with
//! rank, extents and element strides. Storage is always contiguous; the
//! strides encode the memory order. Python semantics that C lacks (floor
//! division, modulo with the sign of the divisor, integer powers, `print`
//! formatting) live here as `static inline` helpers.

use std::path::PathBuf;

use super::{FileRole, GeneratedFile};

pub(crate) const FILE_NAME: &str = "ndarray.h";

/// Highest array rank the runtime stores
pub(crate) const MAX_RANK: usize = 8;

pub(crate) fn runtime_file() -> GeneratedFile {
    GeneratedFile {
        path: PathBuf::from(FILE_NAME),
        role: FileRole::Runtime,
        contents: NDARRAY_H.replace("@MAX_RANK@", &MAX_RANK.to_string()),
    }
}

const NDARRAY_H: &str = r#"#ifndef NV_NDARRAY_H
#define NV_NDARRAY_H

#include <inttypes.h>
#include <stdbool.h>
#include <stdint.h>
#include <stdio.h>
#include <stdlib.h>
#include <string.h>
#include <tgmath.h>

#define NV_MAX_RANK @MAX_RANK@

typedef struct {
    void *data;
    int32_t rank;
    int64_t shape[NV_MAX_RANK];
    /* in elements */
    int64_t strides[NV_MAX_RANK];
    int64_t itemsize;
    char order;
    bool owner;
} nv_ndarray;

static inline int64_t nv_size(nv_ndarray a)
{
    int64_t n = 1;
    for (int32_t k = 0; k < a.rank; k++)
        n *= a.shape[k];
    return n;
}

static inline void nv_free(nv_ndarray *a)
{
    if (a->owner)
        free(a->data);
    a->data = NULL;
    a->owner = false;
    a->rank = 0;
}

/* Give `a` the requested shape; storage is kept when nothing changes */
static inline void nv_ensure(nv_ndarray *a, int32_t rank, const int64_t *shape, int64_t itemsize, char order)
{
    bool same = a->data != NULL && a->rank == rank && a->itemsize == itemsize && a->order == order;
    for (int32_t k = 0; same && k < rank; k++)
        same = a->shape[k] == shape[k];
    if (same)
        return;
    nv_free(a);
    int64_t n = 1;
    for (int32_t k = 0; k < rank; k++) {
        a->shape[k] = shape[k];
        n *= shape[k];
    }
    int64_t stride = 1;
    for (int32_t i = 0; i < rank; i++) {
        int32_t k = order == 'C' ? rank - 1 - i : i;
        a->strides[k] = stride;
        stride *= shape[k];
    }
    a->rank = rank;
    a->itemsize = itemsize;
    a->order = order;
    a->data = calloc(n > 0 ? (size_t)n : 1, (size_t)itemsize);
    if (a->data == NULL) {
        fprintf(stderr, "nv_ensure: out of memory\n");
        exit(1);
    }
    a->owner = true;
}

/* Non-owning view of `a` */
static inline nv_ndarray nv_view(nv_ndarray a)
{
    a.owner = false;
    return a;
}

static inline nv_ndarray nv_copy(nv_ndarray a)
{
    nv_ndarray out = {0};
    nv_ensure(&out, a.rank, a.shape, a.itemsize, a.order);
    memcpy(out.data, a.data, (size_t)(nv_size(a) * a.itemsize));
    return out;
}

/* Take over an array returned by a call */
static inline void nv_assign(nv_ndarray *dst, nv_ndarray src)
{
    nv_free(dst);
    *dst = src;
}

static inline int64_t nv_floordiv_i64(int64_t a, int64_t b)
{
    int64_t q = a / b;
    if (a % b != 0 && ((a < 0) != (b < 0)))
        q -= 1;
    return q;
}

static inline int64_t nv_mod_i64(int64_t a, int64_t b)
{
    int64_t r = a % b;
    if (r != 0 && ((r < 0) != (b < 0)))
        r += b;
    return r;
}

static inline double nv_fmod(double a, double b)
{
    double r = fmod(a, b);
    if (r != 0 && ((r < 0) != (b < 0)))
        r += b;
    return r;
}

static inline int64_t nv_ipow_i64(int64_t base, int64_t exp)
{
    if (exp < 0)
        return base == 1 ? 1 : (base == -1 ? (exp % 2 ? -1 : 1) : 0);
    int64_t r = 1;
    while (exp) {
        if (exp & 1)
            r *= base;
        base *= base;
        exp >>= 1;
    }
    return r;
}

static inline int64_t nv_max_i64(int64_t a, int64_t b) { return a >= b ? a : b; }
static inline int64_t nv_min_i64(int64_t a, int64_t b) { return a <= b ? a : b; }

static inline int64_t nv_arange_count_i64(int64_t start, int64_t stop, int64_t step)
{
    if (step > 0)
        return stop > start ? (stop - start + step - 1) / step : 0;
    return stop < start ? (start - stop - step - 1) / -step : 0;
}

static inline int64_t nv_arange_count_f64(double start, double stop, double step)
{
    double n = ceil((stop - start) / step);
    return n > 0 ? (int64_t)n : 0;
}

/* Shortest text that reads back to `x`, formatted like Python's repr */
static inline void nv_format_real(char *buf, size_t size, double x, bool single, bool point)
{
    if (isnan(x)) {
        snprintf(buf, size, "nan");
        return;
    }
    if (isinf(x)) {
        snprintf(buf, size, x > 0 ? "inf" : "-inf");
        return;
    }
    int digits = 1;
    int max_digits = single ? 9 : 17;
    for (; digits < max_digits; digits++) {
        snprintf(buf, size, "%.*e", digits - 1, x);
        double back = strtod(buf, NULL);
        if (single ? (float)back == (float)x : back == x)
            break;
    }
    snprintf(buf, size, "%.*e", digits - 1, x);
    int exp = atoi(strchr(buf, 'e') + 1);
    if (exp < -4 || exp >= 16)
        return;
    int decimals = digits - 1 - exp;
    snprintf(buf, size, "%.*f", decimals > 0 ? decimals : 0, x);
    if (point && strchr(buf, '.') == NULL)
        strncat(buf, ".0", size - strlen(buf) - 1);
}

static inline void nv_print_sep(void) { fputs(" ", stdout); }
static inline void nv_print_end(void) { fputs("\n", stdout); }
static inline void nv_print_str(const char *s) { fputs(s, stdout); }
static inline void nv_print_bool(bool b) { fputs(b ? "True" : "False", stdout); }
static inline void nv_print_i64(int64_t v) { printf("%" PRId64, v); }

static inline void nv_print_f64(double v)
{
    char buf[64];
    nv_format_real(buf, sizeof buf, v, false, true);
    fputs(buf, stdout);
}

static inline void nv_print_f32(float v)
{
    char buf[64];
    nv_format_real(buf, sizeof buf, (double)v, true, true);
    fputs(buf, stdout);
}

static inline void nv_print_c128(double complex v)
{
    char re[64], im[64];
    nv_format_real(im, sizeof im, cimag(v), false, false);
    if (creal(v) == 0 && !signbit(creal(v))) {
        printf("%sj", im);
        return;
    }
    nv_format_real(re, sizeof re, creal(v), false, false);
    printf("(%s%s%sj)", re, (im[0] == '-' || isnan(cimag(v))) ? "" : "+", im);
}

#endif
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_header_is_self_contained() {
        let file = runtime_file();
        assert_eq!(file.role, FileRole::Runtime);
        assert!(file.contents.starts_with("#ifndef NV_NDARRAY_H"));
        assert!(file.contents.contains("#define NV_MAX_RANK 8"));
        assert!(!file.contents.contains('@'));
        for helper in ["nv_ensure", "nv_copy", "nv_floordiv_i64", "nv_print_c128"] {
            assert!(file.contents.contains(helper), "missing {}", helper);
        }
    }
}
