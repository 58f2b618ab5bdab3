/*!

This is the long-form manual for `probe_import` and `probesync`.

## Input file

The input is the spreadsheet (xlsx) exported by the handheld water-quality probe. Only the first
worksheet is read. Its first row is the header, and every following row is one sample.

The probe firmware writes the following 24 columns:

`ID`, `Model Name`, `Date`, `EC`, `EC(Unit)`, `TDS`, `TDS(Unit)`, `SALT(%)`, `SALT(TDS)`,
`SALT(TDS)(Unit)`, `SALT(S.G.)`, `pH`, `Humidity(%)`, `ORP(mV)`, `H2(ppb)`, `H2(ppm)`, `DO(mg/L)`,
`DO(%)`, `CF`, `CL(mg/L)`, `Temperature(°C)`, `Temperature(°F)`, `Location`, `Notes`

Different firmware versions add or drop a few of them. A file is accepted when:
* the essential columns `ID`, `Date`, `EC`, `pH` and `Temperature(°C)` are all present, and
* at least 70% of the 24 columns above are present (17 columns).

Any other column is ignored.

## Measurements

Seven columns are read as measurements:

| column            | parameter id | parameter                     |
|-------------------|--------------|-------------------------------|
| `EC`              | 10           | electrical conductivity       |
| `TDS`             | 29           | total dissolved solids        |
| `pH`              | 2            | pH                            |
| `ORP(mV)`         | 34           | oxidation-reduction potential |
| `DO(mg/L)`        | 3            | dissolved oxygen              |
| `Temperature(°C)` | 1            | temperature                   |
| `SALT(%)`         | 33           | salinity                      |

An empty cell or a `-` means that the probe did not measure this parameter. The same goes for any
text that is not a number. It is never read as zero.

A row is kept when it has a `Date` and at least one measurement. Other rows are skipped. They are
not an error, but they are counted and reported at the end of the import.

## Environmental survey

For every kept row, five yes/no questions must be answered:

* is the colour of the water altered?
* is there a noticeable smell?
* has it rained in the last 48 hours?
* is there visible residue?
* is the water volume reduced?

A free text note may be added. The rows are answered in file order and a row cannot be revisited.
Cancelling abandons the whole file: nothing is sent.

## Output file

After the readings have been stored, the spreadsheet is written again with six more columns:
`Cor_Alterada`, `Cheiro_Alterado`, `Chuva_48h`, `Residuos_Visiveis`, `Volume_Reduzido` (written as
`Sim` or `Não`) and `Observacoes` (the note, verbatim). Rows that were skipped by the import keep
these cells empty. All the other cells are unchanged.

The file is stored under `{volunteer code}/{YYYY-MM}/{file name}`, where the month is the month of
the upload (UTC), not of the samples. An existing file is never overwritten, and files larger than
10 MB are refused.

*/
