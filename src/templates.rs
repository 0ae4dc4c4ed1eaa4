//! Template engine setup and embedded HTML templates.

use once_cell::sync::Lazy;
use tera::{Context, Tera};

/// Global template engine instance with embedded templates.
pub static TEMPLATES: Lazy<Tera> = Lazy::new(|| {
    let mut tera = Tera::default();

    // Embed templates directly in the binary (no external files needed)
    tera.add_raw_templates(vec![
        ("base.html", BASE_TEMPLATE),
        ("report.html", REPORT_TEMPLATE),
        ("measures.html", MEASURES_TEMPLATE),
        ("progress.html", PROGRESS_TEMPLATE),
    ])
    .expect("Failed to load templates");

    tera
});

/// Render a template with context
pub fn render(template: &str, context: &Context) -> Result<String, tera::Error> {
    TEMPLATES.render(template, context)
}

const BASE_TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="es">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{% block title %}Plan de Descontaminación{% endblock %}</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Helvetica, Arial, sans-serif;
            margin: 2rem auto;
            max-width: 960px;
            color: #1a1a2e;
            line-height: 1.5;
        }
        h1 { font-size: 1.6rem; margin-bottom: 0.25rem; }
        h2 { font-size: 1.2rem; margin-top: 1.5rem; border-bottom: 1px solid #ddd; padding-bottom: 0.25rem; }
        table { border-collapse: collapse; width: 100%; margin-top: 0.75rem; }
        th, td { border: 1px solid #ccc; padding: 0.4rem 0.6rem; text-align: left; }
        th { background: #f0f2f5; }
        .meta { color: #666; font-size: 0.9rem; }
    </style>
</head>
<body>
{% block content %}{% endblock %}
</body>
</html>"##;

const REPORT_TEMPLATE: &str = r##"{% extends "base.html" %}
{% block title %}{{ summary.titulo }}{% endblock %}
{% block content %}
<h1>{{ summary.titulo }}</h1>
<p class="meta">Fecha: {{ summary.fecha }}</p>

<h2>Resumen General</h2>
<table>
    <tr><th>Total de Medidas</th><td>{{ summary.total_medidas }}</td></tr>
    <tr><th>Avance Global</th><td>{{ summary.avance_global | round(precision=1) }}%</td></tr>
</table>

<h2>Estado de las Medidas</h2>
<table>
    <tr><th>Estado</th><th>Total</th><th>Avance Promedio</th></tr>
    {% for row in summary.estado_medidas %}
    <tr>
        <td>{{ status_labels[loop.index0] }}</td>
        <td>{{ row.cantidad }}</td>
        <td>{{ row.avance_promedio | round(precision=1) }}%</td>
    </tr>
    {% endfor %}
</table>

<h2>Avance por Componente</h2>
<table>
    <tr><th>Componente</th><th>Total Medidas</th><th>Avance</th></tr>
    {% for row in summary.avance_componentes %}
    <tr>
        <td>{{ row.nombre }}</td>
        <td>{{ row.total_medidas }}</td>
        <td>{{ row.avance_promedio | round(precision=1) }}%</td>
    </tr>
    {% endfor %}
</table>
{% endblock %}"##;

const MEASURES_TEMPLATE: &str = r##"{% extends "base.html" %}
{% block title %}Medidas{% endblock %}
{% block content %}
<h1>Medidas</h1>
<table>
    <tr>
        <th>Código</th><th>Nombre de la Medida</th><th>Componente</th>
        <th>Estado</th><th>Avance (%)</th><th>Fecha Inicio</th><th>Fecha Término</th>
    </tr>
    {% for m in measures %}
    <tr>
        <td>{{ m.codigo }}</td>
        <td>{{ m.nombre }}</td>
        <td>{{ m.componente_nombre }}</td>
        <td>{{ m.estado }}</td>
        <td>{{ m.porcentaje_avance | round(precision=1) }}</td>
        <td>{{ m.fecha_inicio }}</td>
        <td>{{ m.fecha_termino }}</td>
    </tr>
    {% endfor %}
</table>
{% endblock %}"##;

const PROGRESS_TEMPLATE: &str = r##"{% extends "base.html" %}
{% block title %}Registros de Avance{% endblock %}
{% block content %}
<h1>Registros de Avance</h1>
<table>
    <tr>
        <th>Código Medida</th><th>Medida</th><th>Organismo</th>
        <th>Fecha</th><th>Avance (%)</th><th>Descripción</th>
    </tr>
    {% for r in records %}
    <tr>
        <td>{{ r.medida_codigo }}</td>
        <td>{{ r.medida_nombre }}</td>
        <td>{{ r.organismo_nombre }}</td>
        <td>{{ r.fecha_registro }}</td>
        <td>{{ r.porcentaje_avance | round(precision=1) }}</td>
        <td>{{ r.descripcion }}</td>
    </tr>
    {% endfor %}
</table>
{% endblock %}"##;
